// Versioned schema migrations

use crate::error::map_sqlx_error;
use crate::sql::ensure_table_name;
use keystone_core::domain::filter::is_valid_field_name;
use keystone_core::error::{AppError, Result};
use sqlx::SqlitePool;
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// One schema step with its inverse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: Cow<'static, str>,
    pub up: Cow<'static, str>,
    pub down: Cow<'static, str>,
}

impl Migration {
    pub const fn new(
        version: i64,
        name: &'static str,
        up: &'static str,
        down: &'static str,
    ) -> Self {
        Self {
            version,
            name: Cow::Borrowed(name),
            up: Cow::Borrowed(up),
            down: Cow::Borrowed(down),
        }
    }

    /// Document table for a repository entity.
    ///
    /// Each `unique_fields` entry gets a partial unique index that only
    /// covers live rows, so a soft-deleted row frees its value.
    pub fn entity_table(version: i64, table: &str, unique_fields: &[&str]) -> Result<Self> {
        ensure_table_name(table)?;

        let mut up = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL CHECK (json_valid(data)),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_{table}_deleted_at ON {table}(deleted_at);
"
        );
        for field in unique_fields {
            if !is_valid_field_name(field) {
                return Err(AppError::invalid_field(
                    "unique_fields",
                    format!("'{field}' is not a valid field name"),
                ));
            }
            let index = field.replace('.', "_");
            up.push_str(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_{table}_{index} \
                 ON {table}(json_extract(data, '$.{field}')) WHERE deleted_at IS NULL;\n"
            ));
        }

        Ok(Self {
            version,
            name: Cow::Owned(format!("create_{table}")),
            up: Cow::Owned(up),
            down: Cow::Owned(format!("DROP TABLE IF EXISTS {table};")),
        })
    }
}

/// Built-in tables. Versions below 100 are reserved for these.
pub fn core_migrations() -> Vec<Migration> {
    vec![Migration::new(
        1,
        "task_tables",
        include_str!("../migrations/0001_task_tables.up.sql"),
        include_str!("../migrations/0001_task_tables.down.sql"),
    )]
}

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL
)";

/// Applies migrations in version order, recording each in `schema_migrations`
pub struct MigrationRunner {
    pool: SqlitePool,
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Runner preloaded with the built-in migrations
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            migrations: core_migrations(),
        }
    }

    pub fn with_migrations(mut self, migrations: impl IntoIterator<Item = Migration>) -> Self {
        self.migrations.extend(migrations);
        self
    }

    fn ordered(&self) -> Result<Vec<&Migration>> {
        let mut seen = HashSet::new();
        for migration in &self.migrations {
            if !seen.insert(migration.version) {
                return Err(AppError::Config(format!(
                    "duplicate migration version {}",
                    migration.version
                )));
            }
        }
        let mut ordered: Vec<&Migration> = self.migrations.iter().collect();
        ordered.sort_by_key(|m| m.version);
        Ok(ordered)
    }

    async fn ensure_ledger(&self) -> Result<()> {
        sqlx::query(CREATE_LEDGER)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn applied_versions(&self) -> Result<Vec<i64>> {
        self.ensure_ledger().await?;
        sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    /// Apply every pending migration, each in its own transaction.
    /// Returns the versions applied by this call.
    pub async fn apply(&self) -> Result<Vec<i64>> {
        let ordered = self.ordered()?;
        let applied: HashSet<i64> = self.applied_versions().await?.into_iter().collect();

        let mut newly_applied = Vec::new();
        for migration in ordered {
            if applied.contains(&migration.version) {
                continue;
            }

            // Claim the ledger row first: a concurrent runner that got there
            // before us leaves nothing to insert, and we skip the script.
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            let claimed = sqlx::query(
                "INSERT OR IGNORE INTO schema_migrations (version, name, applied_at)
                 VALUES (?, ?, CAST(strftime('%s', 'now') AS INTEGER) * 1000)",
            )
            .bind(migration.version)
            .bind(migration.name.as_ref())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
            if claimed == 0 {
                tx.rollback().await.map_err(map_sqlx_error)?;
                debug!(version = migration.version, "Migration applied concurrently, skipping");
                continue;
            }
            sqlx::raw_sql(&migration.up)
                .execute(&mut *tx)
                .await
                .map_err(|e| step_failed(migration, "apply", e))?;
            tx.commit().await.map_err(map_sqlx_error)?;

            info!(version = migration.version, name = %migration.name, "Migration applied");
            newly_applied.push(migration.version);
        }
        Ok(newly_applied)
    }

    /// Revert applied migrations above `target`, newest first.
    /// Returns the versions reverted.
    pub async fn rollback_to(&self, target: i64) -> Result<Vec<i64>> {
        let ordered = self.ordered()?;
        let mut applied = self.applied_versions().await?;
        applied.retain(|version| *version > target);
        applied.reverse();

        let mut reverted = Vec::new();
        for version in applied {
            let migration = ordered
                .iter()
                .find(|m| m.version == version)
                .ok_or_else(|| {
                    AppError::Config(format!("no down script known for migration {version}"))
                })?;

            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            sqlx::raw_sql(&migration.down)
                .execute(&mut *tx)
                .await
                .map_err(|e| step_failed(migration, "revert", e))?;
            sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
                .bind(version)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            tx.commit().await.map_err(map_sqlx_error)?;

            warn!(version, name = %migration.name, "Migration reverted");
            reverted.push(version);
        }
        Ok(reverted)
    }
}

fn step_failed(migration: &Migration, action: &str, err: sqlx::Error) -> AppError {
    AppError::Database(format!(
        "failed to {action} migration {} ({}): {}",
        migration.version,
        migration.name,
        map_sqlx_error(err)
    ))
}

/// Apply the built-in migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<Vec<i64>> {
    MigrationRunner::new(pool.clone()).apply().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::create_pool;

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_create_task_tables() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        assert_eq!(run_migrations(&pool).await.unwrap(), vec![1]);

        let tables = table_names(&pool).await;
        assert!(tables.contains(&"tasks".to_string()));
        assert!(tables.contains(&"task_schedules".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[tokio::test]
    async fn test_reapplying_is_a_no_op() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let schema_before: Vec<String> =
            sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();

        assert!(run_migrations(&pool).await.unwrap().is_empty());
        let schema_after: Vec<String> =
            sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(schema_before, schema_after);
    }

    #[tokio::test]
    async fn test_entity_table_and_rollback() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        let runner = MigrationRunner::new(pool.clone())
            .with_migrations([Migration::entity_table(100, "users", &["email"]).unwrap()]);

        assert_eq!(runner.apply().await.unwrap(), vec![1, 100]);
        assert!(table_names(&pool).await.contains(&"users".to_string()));

        assert_eq!(runner.rollback_to(1).await.unwrap(), vec![100]);
        assert!(!table_names(&pool).await.contains(&"users".to_string()));
        assert_eq!(runner.applied_versions().await.unwrap(), vec![1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_runners_apply_each_version_once() {
        let path = std::env::temp_dir().join(format!("keystone-migrate-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        let runner = |pool: SqlitePool| {
            MigrationRunner::new(pool)
                .with_migrations([Migration::entity_table(100, "users", &["email"]).unwrap()])
        };
        let first = runner(create_pool(&url, 2).await.unwrap());
        let second = runner(create_pool(&url, 2).await.unwrap());

        let (a, b) = tokio::join!(first.apply(), second.apply());
        let mut applied = a.unwrap();
        applied.extend(b.unwrap());
        applied.sort();
        assert_eq!(applied, vec![1, 100]);
        assert_eq!(first.applied_versions().await.unwrap(), vec![1, 100]);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn test_duplicate_versions_are_rejected() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        let runner = MigrationRunner::new(pool)
            .with_migrations([Migration::entity_table(1, "users", &[]).unwrap()]);
        assert!(matches!(runner.apply().await, Err(AppError::Config(_))));
    }

    #[test]
    fn test_entity_table_rejects_bad_identifiers() {
        assert!(Migration::entity_table(100, "users; DROP", &[]).is_err());
        assert!(Migration::entity_table(100, "users", &["e'mail"]).is_err());
    }
}
