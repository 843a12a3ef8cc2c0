// Document Store Port (Interface)
//
// Narrow, object-safe persistence surface used by every typed repository.
// Rows are untyped: table name, id, JSON data plus the meta columns.

use super::transaction::Transaction;
use crate::domain::{Document, Filter};
use crate::error::Result;
use async_trait::async_trait;

/// Entry point: every unit of work runs inside a transaction
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Begin a new transaction
    async fn begin(&self) -> Result<Box<dyn DocumentTransaction>>;
}

/// Document operations within a transaction
#[async_trait]
pub trait DocumentTransaction: Transaction {
    /// Row by id regardless of soft-delete state
    async fn fetch(&mut self, table: &str, id: &str) -> Result<Option<Document>>;

    /// Rows matching a validated filter, honouring its visibility mode
    async fn query(&mut self, table: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Number of rows matching a validated filter (limit/offset ignored)
    async fn count(&mut self, table: &str, filter: &Filter) -> Result<u64>;

    /// Insert a new row; unique violations surface as `DuplicateKey`
    async fn insert(&mut self, table: &str, doc: &Document) -> Result<()>;

    /// Overwrite data, `updated_at` and `deleted_at` of an existing row.
    /// Returns false when no row has that id.
    async fn write(&mut self, table: &str, doc: &Document) -> Result<bool>;

    /// Physically delete a row. Returns false when no row has that id.
    async fn remove(&mut self, table: &str, id: &str) -> Result<bool>;
}
