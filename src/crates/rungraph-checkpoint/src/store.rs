//! Long-term memory storage
//!
//! The memory store holds facts that outlive any single thread or run, for
//! example user preferences a step recalls in a later conversation. Steps read
//! and write it directly; it is not part of the checkpoint log and is never
//! rolled back when a superstep fails.
//!
//! Items are addressed by a hierarchical [`Namespace`] plus a key:
//!
//! ```rust,ignore
//! use rungraph_checkpoint::{InMemoryMemoryStore, MemoryStore, Namespace};
//! use serde_json::json;
//!
//! let store = InMemoryMemoryStore::new();
//! let ns = Namespace::from("users/u1");
//! store.put(&ns, "language", json!("Rust")).await?;
//!
//! let hits = store.search(&Namespace::from("users"), "rust", None).await?;
//! assert_eq!(hits[0].key, "language");
//! ```
//!
//! [`InMemoryMemoryStore::search`] ranks by term overlap, then recency.
//! Backends with embeddings rank however they like; the only contract is
//! "best match first".

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Hierarchical namespace, e.g. `["users", "u1", "preferences"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace(Vec<String>);

impl Namespace {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` if `prefix` is this namespace or one of its ancestors
    pub fn starts_with(&self, prefix: &Namespace) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl From<&str> for Namespace {
    /// Splits on `/`, skipping empty segments.
    fn from(path: &str) -> Self {
        Self::new(path.split('/').filter(|s| !s.is_empty()))
    }
}

impl From<Vec<String>> for Namespace {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// A stored long-term memory record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryItem {
    pub namespace: Namespace,

    pub key: String,

    pub value: Value,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Relevance of a search hit; absent on plain reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Namespaced key-value storage for long-term facts
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, namespace: &Namespace, key: &str) -> StoreResult<Option<MemoryItem>>;

    /// Insert or overwrite. `created_at` is preserved on overwrite.
    async fn put(&self, namespace: &Namespace, key: &str, value: Value) -> StoreResult<()>;

    async fn delete(&self, namespace: &Namespace, key: &str) -> StoreResult<bool>;

    /// Items under `namespace` (including descendants), best match first.
    async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<MemoryItem>>;

    /// Distinct namespaces starting with `prefix`, sorted.
    async fn list_namespaces(&self, prefix: &Namespace) -> StoreResult<Vec<Namespace>>;
}

pub(crate) type MemoryTable = HashMap<Namespace, HashMap<String, MemoryItem>>;

/// In-memory [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemoryStore {
    data: Arc<RwLock<MemoryTable>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Fraction of query terms found in the item's key or value text.
fn relevance(item: &MemoryItem, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 1.0;
    }

    let haystack = format!("{} {}", item.key, item.value).to_lowercase();
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

/// Insert or overwrite an item, keeping `created_at` of an existing one.
pub(crate) fn upsert(
    table: &mut MemoryTable,
    namespace: &Namespace,
    key: &str,
    value: Value,
) -> StoreResult<()> {
    if namespace.is_empty() {
        return Err(StoreError::InvalidNamespace(
            "namespace must have at least one segment".to_string(),
        ));
    }

    let now = Utc::now();
    let items = table.entry(namespace.clone()).or_default();
    match items.get_mut(key) {
        Some(item) => {
            item.value = value;
            item.updated_at = now;
        }
        None => {
            items.insert(
                key.to_string(),
                MemoryItem {
                    namespace: namespace.clone(),
                    key: key.to_string(),
                    value,
                    created_at: now,
                    updated_at: now,
                    score: None,
                },
            );
        }
    }
    Ok(())
}

/// Remove an item, dropping its namespace once empty.
pub(crate) fn remove(table: &mut MemoryTable, namespace: &Namespace, key: &str) -> bool {
    let Some(items) = table.get_mut(namespace) else {
        return false;
    };

    let removed = items.remove(key).is_some();
    if items.is_empty() {
        table.remove(namespace);
    }
    removed
}

pub(crate) fn search_table(
    table: &MemoryTable,
    namespace: &Namespace,
    query: &str,
    limit: Option<usize>,
) -> Vec<MemoryItem> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();

    let mut hits: Vec<MemoryItem> = table
        .iter()
        .filter(|(ns, _)| ns.starts_with(namespace))
        .flat_map(|(_, items)| items.values())
        .filter_map(|item| {
            let score = relevance(item, &terms);
            (score > 0.0).then(|| MemoryItem {
                score: Some(score),
                ..item.clone()
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });

    if let Some(limit) = limit {
        hits.truncate(limit);
    }
    hits
}

pub(crate) fn namespaces(table: &MemoryTable, prefix: &Namespace) -> Vec<Namespace> {
    let mut namespaces: Vec<Namespace> = table
        .keys()
        .filter(|ns| ns.starts_with(prefix))
        .cloned()
        .collect();
    namespaces.sort();
    namespaces
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get(&self, namespace: &Namespace, key: &str) -> StoreResult<Option<MemoryItem>> {
        let data = self.data.read().await;
        Ok(data.get(namespace).and_then(|items| items.get(key)).cloned())
    }

    async fn put(&self, namespace: &Namespace, key: &str, value: Value) -> StoreResult<()> {
        upsert(&mut *self.data.write().await, namespace, key, value)
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> StoreResult<bool> {
        Ok(remove(&mut *self.data.write().await, namespace, key))
    }

    async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<MemoryItem>> {
        Ok(search_table(&*self.data.read().await, namespace, query, limit))
    }

    async fn list_namespaces(&self, prefix: &Namespace) -> StoreResult<Vec<Namespace>> {
        Ok(namespaces(&*self.data.read().await, prefix))
    }
}
