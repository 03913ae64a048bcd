//! Collection-based document storage.
//!
//! The application only ever needs `get`, `set` and simple queries made of
//! equality/inequality filters, ordering and a limit. [`MemoryStore`] keeps
//! everything in process (tests, local development); [`FirestoreStore`] talks
//! to Cloud Firestore or its emulator over REST.

mod firestore;
mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub type Fields = Map<String, Value>;

/// A stored document: its id plus its fields. The id is not part of the fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    /// Deserializes the document into `T`, exposing the id as an `id` field.
    pub fn parse<T: DeserializeOwned>(self) -> Result<T> {
        let mut data = self.data;
        data.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(data))
            .with_context(|| format!("Malformed document '{}'", self.id))
    }
}

/// Serializes `value` into document fields, dropping any `id` field.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value).context("Failed to serialize document")? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(anyhow::anyhow!("Document must be an object, got {other}")),
    }
}

/// A fresh random document id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// An id that cannot name a document inside a single collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid document id")]
pub struct InvalidDocumentId(pub String);

/// Checks that `id` names exactly one document of a collection: it must be
/// non-empty, contain no `/` and not be a `.` or `..` path segment.
pub fn check_document_id(id: &str) -> Result<(), InvalidDocumentId> {
    if id.is_empty() || id == "." || id == ".." || id.contains('/') {
        return Err(InvalidDocumentId(id.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Whether `fields` satisfies this filter. A missing field never matches,
    /// not even a `NotEqual` filter.
    pub fn matches(&self, fields: &Fields) -> bool {
        match (fields.get(&self.field), self.op) {
            (None, _) => false,
            (Some(v), FilterOp::Equal) => *v == self.value,
            (Some(Value::Null), FilterOp::NotEqual) => false,
            (Some(v), FilterOp::NotEqual) => *v != self.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::Equal,
            value: value.into(),
        });
        self
    }

    pub fn where_ne(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::NotEqual,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Storage backend for the `users`, `interviews` and `feedback` collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Creates or fully replaces the document with the given id.
    async fn set(&self, collection: &str, id: &str, data: Fields) -> Result<()>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    fn new_id(&self) -> String {
        generate_id()
    }
}

/// Total order over JSON values used for `order_by`: missing, null, bools,
/// numbers, strings, then everything else.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
