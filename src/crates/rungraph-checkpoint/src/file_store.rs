//! Durable, file-backed memory store
//!
//! Each namespace is one JSON file under a root directory holding that
//! namespace's items:
//!
//! ```text
//! <root>/
//!   users.u1.json        [{"namespace":["users","u1"],"key":"language",...}]
//!   org%3Aacme.json      namespace ["org:acme"]
//! ```
//!
//! The whole store is loaded at open and served from memory. A write rewrites
//! its namespace file through a temporary file and a rename, so a crash leaves
//! either the old or the new contents.

use crate::{
    error::{CheckpointError, StoreError, StoreResult},
    file::encode_file_stem,
    serializer::{JsonSerializer, SerializerProtocol},
    store::{
        namespaces, remove, search_table, upsert, MemoryItem, MemoryStore, MemoryTable, Namespace,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

const EXTENSION: &str = "json";

fn encoding(err: CheckpointError) -> StoreError {
    StoreError::Other(err.to_string())
}

/// Memory store persisting each namespace to disk
#[derive(Debug)]
pub struct FileMemoryStore<S = JsonSerializer> {
    root: PathBuf,
    serializer: S,
    data: RwLock<MemoryTable>,
}

impl FileMemoryStore<JsonSerializer> {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_serializer(root, JsonSerializer::new()).await
    }
}

impl<S: SerializerProtocol> FileMemoryStore<S> {
    pub async fn with_serializer(root: impl Into<PathBuf>, serializer: S) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut table = MemoryTable::new();
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }

            let bytes = fs::read(&path).await?;
            let items: Vec<MemoryItem> = serializer.loads(&bytes).map_err(encoding)?;
            for item in items {
                table
                    .entry(item.namespace.clone())
                    .or_default()
                    .insert(item.key.clone(), item);
            }
        }

        tracing::debug!(
            root = %root.display(),
            namespaces = table.len(),
            "Opened file memory store"
        );
        Ok(Self {
            root,
            serializer,
            data: RwLock::new(table),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn namespace_path(&self, namespace: &Namespace) -> PathBuf {
        let stem: Vec<String> = namespace
            .segments()
            .iter()
            .map(|segment| encode_file_stem(segment))
            .collect();
        self.root.join(format!("{}.{}", stem.join("."), EXTENSION))
    }

    /// Write `namespace`'s items from `table`, removing the file once empty.
    async fn persist(&self, table: &MemoryTable, namespace: &Namespace) -> StoreResult<()> {
        let path = self.namespace_path(namespace);

        let Some(items) = table.get(namespace) else {
            return match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        };

        let mut items: Vec<&MemoryItem> = items.values().collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        let bytes = self.serializer.dumps(&items).map_err(encoding)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Apply `change` to the table and persist the namespace, undoing the
    /// change if the write fails.
    async fn write<T>(
        &self,
        namespace: &Namespace,
        change: impl FnOnce(&mut MemoryTable) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut table = self.data.write().await;
        let previous = table.get(namespace).cloned();
        let result = change(&mut *table)?;

        if let Err(err) = self.persist(&*table, namespace).await {
            match previous {
                Some(items) => table.insert(namespace.clone(), items),
                None => table.remove(namespace),
            };
            return Err(err);
        }
        Ok(result)
    }
}

#[async_trait]
impl<S: SerializerProtocol> MemoryStore for FileMemoryStore<S> {
    async fn get(&self, namespace: &Namespace, key: &str) -> StoreResult<Option<MemoryItem>> {
        let data = self.data.read().await;
        Ok(data.get(namespace).and_then(|items| items.get(key)).cloned())
    }

    async fn put(&self, namespace: &Namespace, key: &str, value: Value) -> StoreResult<()> {
        self.write(namespace, |table| upsert(table, namespace, key, value))
            .await
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> StoreResult<bool> {
        self.write(namespace, |table| Ok(remove(table, namespace, key)))
            .await
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_items_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let users = Namespace::from("users/u1");

        let created = {
            let store = FileMemoryStore::open(dir.path()).await.unwrap();
            store.put(&users, "language", json!("Rust")).await.unwrap();
            store.put(&users, "editor", json!("vim")).await.unwrap();
            store.put(&Namespace::new(["org:acme"]), "plan", json!("pro")).await.unwrap();
            store.get(&users, "language").await.unwrap().unwrap().created_at
        };

        let store = FileMemoryStore::open(dir.path()).await.unwrap();
        assert_eq!(store.len().await, 3);

        let language = store.get(&users, "language").await.unwrap().unwrap();
        assert_eq!(language.value, json!("Rust"));
        assert_eq!(language.created_at, created);

        let hits = store.search(&Namespace::from("users"), "rust", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "language");

        store.put(&users, "language", json!("Rust 2021")).await.unwrap();
        let reopened = FileMemoryStore::open(dir.path()).await.unwrap();
        let language = reopened.get(&users, "language").await.unwrap().unwrap();
        assert_eq!(language.value, json!("Rust 2021"));
        assert_eq!(language.created_at, created);
    }

    #[tokio::test]
    async fn test_emptied_namespace_removes_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::open(dir.path()).await.unwrap();
        let ns = Namespace::from("scratch");

        store.put(&ns, "k", json!(1)).await.unwrap();
        let path = store.namespace_path(&ns);
        assert!(path.exists());

        assert!(store.delete(&ns, "k").await.unwrap());
        assert!(!path.exists());
        assert!(!store.delete(&ns, "k").await.unwrap());

        let reopened = FileMemoryStore::open(dir.path()).await.unwrap();
        assert!(reopened.is_empty().await);
        let all = Namespace::new(Vec::<String>::new());
        assert!(reopened.list_namespaces(&all).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_namespace_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::open(dir.path()).await.unwrap();

        let err = store.put(&Namespace::from(""), "k", json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidNamespace(_)));
        assert!(store.is_empty().await);
    }
}
