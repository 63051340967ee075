//! In-memory checkpoint saver implementation
//!
//! Reference backend used by tests and short-lived processes. Nothing survives
//! a restart; use [`FileCheckpointSaver`](crate::file::FileCheckpointSaver)
//! for durable threads.

use crate::{
    checkpoint::{Checkpoint, ThreadInfo},
    error::Result,
    traits::{check_append, CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct ThreadLog {
    created_at: DateTime<Utc>,
    checkpoints: Vec<Checkpoint>,
}

impl ThreadLog {
    fn info(&self, thread_id: &str) -> ThreadInfo {
        ThreadInfo {
            thread_id: thread_id.to_string(),
            created_at: self.created_at,
            checkpoint_count: self.checkpoints.len(),
            latest_sequence: self.checkpoints.last().map(|c| c.sequence),
        }
    }
}

type CheckpointStorage = Arc<RwLock<HashMap<String, ThreadLog>>>;

/// In-memory checkpoint saver
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|log| log.checkpoints.len())
            .sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut storage = self.storage.write().await;

        let last = storage
            .get(&checkpoint.thread_id)
            .and_then(|log| log.checkpoints.last())
            .map(|c| c.sequence);
        check_append(last, &checkpoint)?;

        let log = storage
            .entry(checkpoint.thread_id.clone())
            .or_insert_with(|| ThreadLog {
                created_at: checkpoint.created_at,
                checkpoints: Vec::new(),
            });
        log.checkpoints.push(checkpoint);

        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(thread_id)
            .and_then(|log| log.checkpoints.last())
            .cloned())
    }

    async fn list(&self, thread_id: &str) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;
        let results: Vec<Result<Checkpoint>> = storage
            .get(thread_id)
            .map(|log| log.checkpoints.iter().cloned().map(Ok).collect())
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn thread(&self, thread_id: &str) -> Result<Option<ThreadInfo>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).map(|log| log.info(thread_id)))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        let storage = self.storage.read().await;
        let mut threads: Vec<ThreadInfo> = storage
            .iter()
            .map(|(thread_id, log)| log.info(thread_id))
            .collect();
        threads.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(threads)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let mut storage = self.storage.write().await;
        Ok(storage.remove(thread_id).is_some())
    }
}
