// SQLite Transaction Implementation

use crate::error::map_sqlx_error;
use crate::sql::{ensure_table_name, push_order_and_page, push_where};
use async_trait::async_trait;
use keystone_core::domain::{Document, Filter};
use keystone_core::error::{AppError, Result};
use keystone_core::port::{DocumentTransaction, Transaction};
use sqlx::{QueryBuilder, Sqlite, Transaction as SqlxTransaction};

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        Ok(Document {
            id: self.id,
            data: serde_json::from_str(&self.data)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, data, created_at, updated_at, deleted_at";

/// Document operations bound to one SQLite transaction.
///
/// Dropping without commit rolls back (sqlx behaviour).
pub struct SqliteDocumentTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl SqliteDocumentTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteDocumentTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl DocumentTransaction for SqliteDocumentTransaction {
    async fn fetch(&mut self, table: &str, id: &str) -> Result<Option<Document>> {
        ensure_table_name(table)?;
        let row: Option<DocumentRow> =
            sqlx::query_as(&format!("SELECT {DOCUMENT_COLUMNS} FROM {table} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_sqlx_error)?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn query(&mut self, table: &str, filter: &Filter) -> Result<Vec<Document>> {
        ensure_table_name(table)?;
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {DOCUMENT_COLUMNS} FROM {table}"));
        push_where(&mut builder, filter)?;
        push_order_and_page(&mut builder, filter);

        let rows: Vec<DocumentRow> = builder
            .build_query_as()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> Result<u64> {
        ensure_table_name(table)?;
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {table}"));
        push_where(&mut builder, filter)?;

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&mut self, table: &str, doc: &Document) -> Result<()> {
        ensure_table_name(table)?;
        sqlx::query(&format!(
            "INSERT INTO {table} (id, data, created_at, updated_at, deleted_at) VALUES (?, ?, ?, ?, ?)"
        ))
        .bind(&doc.id)
        .bind(serde_json::to_string(&doc.data)?)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .bind(doc.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            AppError::DuplicateKey(detail) => {
                AppError::DuplicateKey(format!("{table} {}: {detail}", doc.id))
            }
            other => other,
        })?;
        Ok(())
    }

    async fn write(&mut self, table: &str, doc: &Document) -> Result<bool> {
        ensure_table_name(table)?;
        let result = sqlx::query(&format!(
            "UPDATE {table} SET data = ?, updated_at = ?, deleted_at = ? WHERE id = ?"
        ))
        .bind(serde_json::to_string(&doc.data)?)
        .bind(doc.updated_at)
        .bind(doc.deleted_at)
        .bind(&doc.id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            AppError::DuplicateKey(detail) => {
                AppError::DuplicateKey(format!("{table} {}: {detail}", doc.id))
            }
            other => other,
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&mut self, table: &str, id: &str) -> Result<bool> {
        ensure_table_name(table)?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
