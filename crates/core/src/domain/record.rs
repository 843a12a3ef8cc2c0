// Generic record envelope around caller-defined entity shapes

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RecordId = String;

/// Shallow JSON merge applied by `update`
pub type Patch = serde_json::Map<String, Value>;

/// An entity shape persisted by the repository core.
///
/// The fields are opaque to the core and stored as one JSON document;
/// the entity only names its table. Tables are created with
/// `Migration::entity_table` in the SQLite adapter.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: &'static str;
}

/// A stored entity plus the metadata the core manages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<E> {
    pub id: RecordId,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    #[serde(flatten)]
    pub fields: E,
}

impl<E> Record<E> {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Insert payload; `id` is assigned by the repository when absent
#[derive(Debug, Clone)]
pub struct NewRecord<E> {
    pub id: Option<RecordId>,
    pub fields: E,
}

impl<E> NewRecord<E> {
    pub fn new(fields: E) -> Self {
        Self { id: None, fields }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Untyped row exchanged with the document store
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: RecordId,
    pub data: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Document {
    pub fn into_record<E: DeserializeOwned>(self) -> Result<Record<E>, serde_json::Error> {
        Ok(Record {
            fields: serde_json::from_value(self.data)?,
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    #[test]
    fn test_document_into_record() {
        let doc = Document {
            id: "n1".into(),
            data: json!({"title": "hello"}),
            created_at: 10,
            updated_at: 20,
            deleted_at: None,
        };

        let record: Record<Note> = doc.into_record().unwrap();
        assert_eq!(record.id, "n1");
        assert_eq!(record.fields.title, "hello");
        assert!(!record.is_deleted());
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = Record {
            id: "n1".to_string(),
            created_at: 1,
            updated_at: 2,
            deleted_at: Some(3),
            fields: Note {
                title: "t".into(),
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["title"], "t");
        assert_eq!(value["deleted_at"], 3);
    }

    #[test]
    fn test_document_with_wrong_shape_fails() {
        let doc = Document {
            id: "n1".into(),
            data: json!({"title": 42}),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        };
        assert!(doc.into_record::<Note>().is_err());
    }
}
