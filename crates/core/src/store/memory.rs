use super::{Direction, Document, DocumentStore, Fields, Query, check_document_id, compare_values};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;

/// An in-process document store.
///
/// Documents within a collection are kept sorted by id, so queries without an
/// explicit ordering return them in id order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Fields>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Loads a JSON fixture of the form `{"<collection>": [{"id": ..., ...}, ...]}`.
    ///
    /// Returns the number of documents loaded.
    pub async fn load_fixture(&self, path: &Path) -> Result<usize> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        let parsed: HashMap<String, Vec<Value>> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))?;

        let mut loaded = 0;
        for (collection, docs) in parsed {
            for doc in docs {
                let Value::Object(mut data) = doc else {
                    anyhow::bail!("Fixture entries in '{collection}' must be objects");
                };
                let id = match data.remove("id") {
                    Some(Value::String(id)) => id,
                    _ => self.new_id(),
                };
                self.set(&collection, &id, data).await?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        check_document_id(id)?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn set(&self, collection: &str, id: &str, data: Fields) -> Result<()> {
        check_document_id(id)?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(_, data)| query.filters.iter().all(|f| f.matches(data)))
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();

        matched.sort_by(|a, b| {
            for order in &query.order_by {
                let ord = compare_values(a.data.get(&order.field), b.data.get(&order.field));
                let ord = match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
