//! Shared fixtures: throwaway file-backed SQLite databases.
//!
//! File databases (not `:memory:`) so that several pooled connections
//! see the same data, which the concurrency tests depend on.

#![allow(dead_code)]

use keystone_infra_sqlite::{create_pool, run_migrations, SqlitePool};
use std::path::PathBuf;

pub struct TempDb {
    pub path: PathBuf,
    pub pool: SqlitePool,
}

impl TempDb {
    /// Fresh database with the built-in migrations applied
    pub async fn migrated() -> Self {
        let db = Self::empty().await;
        run_migrations(&db.pool).await.unwrap();
        db
    }

    pub async fn empty() -> Self {
        let path = std::env::temp_dir().join(format!("keystone-it-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(&Self::url_for(&path), 5).await.unwrap();
        Self { path, pool }
    }

    pub fn url_for(path: &std::path::Path) -> String {
        format!("sqlite://{}", path.display())
    }

    pub fn url(&self) -> String {
        Self::url_for(&self.path)
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
