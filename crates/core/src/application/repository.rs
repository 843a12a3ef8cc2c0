// Generic repository over the document store port
//
// The typed API is written once against a `DocumentTransaction`
// (`ScopedRepository`); `Repository` wraps every call in its own
// single-operation transaction that commits on success.

use crate::domain::{Document, Entity, Filter, NewRecord, Patch, Record, META_FIELDS};
use crate::error::{AppError, Result, ValidationErrors};
use crate::port::{DocumentStore, DocumentTransaction, IdProvider, TimeProvider};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Auto-committing repository for one entity type
pub struct Repository<E: Entity> {
    store: Arc<dyn DocumentStore>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn TimeProvider>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ids: Arc::clone(&self.ids),
            clock: Arc::clone(&self.clock),
            _entity: PhantomData,
        }
    }
}

/// Commit on success, roll back on failure
async fn finish<T>(tx: Box<dyn DocumentTransaction>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            _entity: PhantomData,
        }
    }

    /// Run operations inside a caller-owned transaction
    pub fn within<'t>(&'t self, tx: &'t mut dyn DocumentTransaction) -> ScopedRepository<'t, E> {
        ScopedRepository {
            tx,
            ids: self.ids.as_ref(),
            clock: self.clock.as_ref(),
            _entity: PhantomData,
        }
    }

    /// Open a transaction for `within`
    pub async fn begin(&self) -> Result<Box<dyn DocumentTransaction>> {
        self.store.begin().await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Record<E>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).get_by_id(id).await;
        finish(tx, outcome).await
    }

    pub async fn get_by_id_including_deleted(&self, id: &str) -> Result<Record<E>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).get_by_id_including_deleted(id).await;
        finish(tx, outcome).await
    }

    pub async fn find_one(&self, filter: &Filter) -> Result<Option<Record<E>>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).find_one(filter).await;
        finish(tx, outcome).await
    }

    pub async fn find_many(&self, filter: &Filter) -> Result<Vec<Record<E>>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).find_many(filter).await;
        finish(tx, outcome).await
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).count(filter).await;
        finish(tx, outcome).await
    }

    pub async fn insert(&self, new: NewRecord<E>) -> Result<Record<E>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).insert(new).await;
        finish(tx, outcome).await
    }

    pub async fn update(&self, id: &str, patch: Patch) -> Result<Record<E>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).update(id, patch).await;
        finish(tx, outcome).await
    }

    pub async fn replace(&self, id: &str, fields: E) -> Result<Record<E>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).replace(id, fields).await;
        finish(tx, outcome).await
    }

    pub async fn soft_delete(&self, id: &str) -> Result<Record<E>> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).soft_delete(id).await;
        finish(tx, outcome).await
    }

    pub async fn hard_delete(&self, id: &str) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let outcome = self.within(tx.as_mut()).hard_delete(id).await;
        finish(tx, outcome).await
    }
}

/// Repository bound to an open transaction
pub struct ScopedRepository<'t, E: Entity> {
    tx: &'t mut dyn DocumentTransaction,
    ids: &'t dyn IdProvider,
    clock: &'t dyn TimeProvider,
    _entity: PhantomData<fn() -> E>,
}

fn not_found<E: Entity>(id: &str) -> AppError {
    AppError::NotFound(format!("{} {} not found", E::TABLE, id))
}

fn to_record<E: Entity>(doc: Document) -> Result<Record<E>> {
    Ok(doc.into_record()?)
}

/// Serialize entity fields; they must form a JSON object
fn to_data<E: Entity>(fields: &E) -> Result<Value> {
    match serde_json::to_value(fields)? {
        Value::Object(map) => Ok(Value::Object(map)),
        _ => Err(AppError::Internal(format!(
            "{} fields must serialize to a JSON object",
            E::TABLE
        ))),
    }
}

impl<'t, E: Entity> ScopedRepository<'t, E> {
    async fn live(&mut self, id: &str) -> Result<Document> {
        match self.tx.fetch(E::TABLE, id).await? {
            Some(doc) if doc.deleted_at.is_none() => Ok(doc),
            _ => Err(not_found::<E>(id)),
        }
    }

    pub async fn get_by_id(&mut self, id: &str) -> Result<Record<E>> {
        to_record(self.live(id).await?)
    }

    pub async fn get_by_id_including_deleted(&mut self, id: &str) -> Result<Record<E>> {
        let doc = self
            .tx
            .fetch(E::TABLE, id)
            .await?
            .ok_or_else(|| not_found::<E>(id))?;
        to_record(doc)
    }

    pub async fn find_one(&mut self, filter: &Filter) -> Result<Option<Record<E>>> {
        let mut first = filter.clone();
        first.limit = Some(1);
        Ok(self.find_many(&first).await?.into_iter().next())
    }

    pub async fn find_many(&mut self, filter: &Filter) -> Result<Vec<Record<E>>> {
        filter.validate()?;
        self.tx
            .query(E::TABLE, filter)
            .await?
            .into_iter()
            .map(to_record)
            .collect()
    }

    pub async fn count(&mut self, filter: &Filter) -> Result<u64> {
        filter.validate()?;
        self.tx.count(E::TABLE, filter).await
    }

    pub async fn insert(&mut self, new: NewRecord<E>) -> Result<Record<E>> {
        let id = match new.id {
            Some(id) if id.trim().is_empty() => {
                return Err(AppError::invalid_field("id", "must not be blank"))
            }
            Some(id) => id,
            None => self.ids.generate_id(),
        };
        let now = self.clock.now_millis();
        let doc = Document {
            id,
            data: to_data(&new.fields)?,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.tx.insert(E::TABLE, &doc).await?;
        debug!(table = E::TABLE, id = %doc.id, "Inserted record");

        Ok(Record {
            id: doc.id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            fields: new.fields,
        })
    }

    /// Shallow merge; the result must still deserialize as `E`
    pub async fn update(&mut self, id: &str, patch: Patch) -> Result<Record<E>> {
        let mut errors = ValidationErrors::new("patch rejected");
        for key in patch.keys() {
            if META_FIELDS.contains(&key.as_str()) {
                errors.push(key.as_str(), "is managed by the repository");
            }
        }
        errors.into_result()?;

        let mut doc = self.live(id).await?;
        let mut data = match doc.data {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        data.extend(patch);

        let fields: E = serde_json::from_value(Value::Object(data)).map_err(|e| {
            AppError::Validation(ValidationErrors::new(format!(
                "patched {} no longer fits its shape: {}",
                E::TABLE,
                e
            )))
        })?;

        doc.data = to_data(&fields)?;
        doc.updated_at = self.clock.now_millis();
        self.write(&doc).await?;

        Ok(Record {
            id: doc.id,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            deleted_at: None,
            fields,
        })
    }

    /// Full overwrite of the fields; id and `created_at` are kept
    pub async fn replace(&mut self, id: &str, fields: E) -> Result<Record<E>> {
        let mut doc = self.live(id).await?;
        doc.data = to_data(&fields)?;
        doc.updated_at = self.clock.now_millis();
        self.write(&doc).await?;

        Ok(Record {
            id: doc.id,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            deleted_at: None,
            fields,
        })
    }

    /// Idempotent: an already deleted record keeps its original `deleted_at`
    pub async fn soft_delete(&mut self, id: &str) -> Result<Record<E>> {
        let mut doc = self
            .tx
            .fetch(E::TABLE, id)
            .await?
            .ok_or_else(|| not_found::<E>(id))?;

        if doc.deleted_at.is_none() {
            let now = self.clock.now_millis();
            doc.deleted_at = Some(now);
            doc.updated_at = now;
            self.write(&doc).await?;
            debug!(table = E::TABLE, id, "Soft-deleted record");
        }
        to_record(doc)
    }

    pub async fn hard_delete(&mut self, id: &str) -> Result<()> {
        if !self.tx.remove(E::TABLE, id).await? {
            return Err(not_found::<E>(id));
        }
        debug!(table = E::TABLE, id, "Hard-deleted record");
        Ok(())
    }

    async fn write(&mut self, doc: &Document) -> Result<()> {
        if !self.tx.write(E::TABLE, doc).await? {
            return Err(not_found::<E>(&doc.id));
        }
        Ok(())
    }
}
