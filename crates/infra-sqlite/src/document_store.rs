// SQLite DocumentStore

use crate::error::map_sqlx_error;
use crate::transaction::SqliteDocumentTransaction;
use async_trait::async_trait;
use keystone_core::error::Result;
use keystone_core::port::{DocumentStore, DocumentTransaction};
use sqlx::SqlitePool;

/// Document tables created via `Migration::entity_table`
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn begin(&self) -> Result<Box<dyn DocumentTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteDocumentTransaction::new(tx)))
    }
}
