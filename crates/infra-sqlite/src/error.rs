// sqlx error classification

use keystone_core::error::AppError;

/// Convert sqlx::Error to AppError with structured information.
///
/// SQLite result codes: https://www.sqlite.org/rescode.html
/// (sqlx reports extended codes).
pub fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
            Some("2067") | Some("1555") => AppError::DuplicateKey(db_err.message().to_string()),
            // SQLITE_BUSY and its extended codes, SQLITE_LOCKED and its extended codes
            Some("5") | Some("261") | Some("517") | Some("773") | Some("6") | Some("262")
            | Some("518") => AppError::Transport(format!(
                "database busy: {}",
                db_err.message()
            )),
            Some("787") | Some("3850") => AppError::Database(format!(
                "Foreign key constraint violation: {}",
                db_err.message()
            )),
            Some("13") => AppError::Database(format!("Database full: {}", db_err.message())),
            Some(code) => {
                AppError::Database(format!("Database error [{}]: {}", code, db_err.message()))
            }
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        // Connection, pool and I/O failures: the store is unreachable
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => AppError::Transport(err.to_string()),
        sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}
