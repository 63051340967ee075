//! Durable, file-backed checkpoint saver
//!
//! Each thread is stored as one append-only JSON-lines file under a root
//! directory:
//!
//! ```text
//! <root>/
//!   t1.jsonl          {"sequence":0,...}\n{"sequence":1,...}\n
//!   user%3A42.jsonl   thread "user:42"
//! ```
//!
//! Thread ids are percent-encoded into file names, so any id is accepted.
//! A trailing line without a newline is a torn write from a crash. It is
//! ignored on read and truncated away before the next append.
//!
//! The latest checkpoint of every thread touched by this saver is cached, so
//! appends and `latest` do not re-read the log. A store directory must be
//! owned by one saver at a time.

use crate::{
    checkpoint::{Checkpoint, ThreadInfo},
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{check_append, CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const EXTENSION: &str = "jsonl";

/// Checkpoint saver persisting each thread's log to disk
#[derive(Debug)]
pub struct FileCheckpointSaver<S = JsonSerializer> {
    root: PathBuf,
    serializer: S,
    /// Latest checkpoint per thread; also serializes writers
    tails: Mutex<HashMap<String, Checkpoint>>,
}

struct LoadedLog {
    checkpoints: Vec<Checkpoint>,
    /// Byte length covered by complete lines
    valid_len: u64,
    file_len: u64,
}

impl FileCheckpointSaver<JsonSerializer> {
    /// Open (creating if needed) a saver rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_serializer(root, JsonSerializer::new()).await
    }
}

impl<S: SerializerProtocol> FileCheckpointSaver<S> {
    pub async fn with_serializer(root: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Opened file checkpoint saver");

        Ok(Self {
            root,
            serializer,
            tails: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", encode_file_stem(thread_id), EXTENSION))
    }

    async fn load(&self, thread_id: &str) -> Result<Option<LoadedLog>> {
        let path = self.thread_path(thread_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        let mut valid_len = 0usize;
        let mut offset = 0usize;

        while offset < bytes.len() {
            let Some(newline) = bytes[offset..].iter().position(|b| *b == b'\n') else {
                tracing::warn!(
                    thread_id,
                    path = %path.display(),
                    bytes = bytes.len() - offset,
                    "Ignoring torn trailing checkpoint record"
                );
                break;
            };

            let line = &bytes[offset..offset + newline];
            if !line.is_empty() {
                checkpoints.push(self.serializer.loads::<Checkpoint>(line)?);
            }
            offset += newline + 1;
            valid_len = offset;
        }

        Ok(Some(LoadedLog {
            checkpoints,
            valid_len: valid_len as u64,
            file_len: bytes.len() as u64,
        }))
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointSaver for FileCheckpointSaver<S> {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut tails = self.tails.lock().await;

        let (last, torn_at) = match tails.get(&checkpoint.thread_id) {
            Some(tail) => (Some(tail.sequence), None),
            None => match self.load(&checkpoint.thread_id).await? {
                Some(log) => (
                    log.checkpoints.last().map(|c| c.sequence),
                    (log.valid_len < log.file_len).then_some(log.valid_len),
                ),
                None => (None, None),
            },
        };
        check_append(last, &checkpoint)?;

        let mut line = self.serializer.dumps(&checkpoint)?;
        if line.contains(&b'\n') {
            return Err(CheckpointError::Invalid(
                "serializer produced a multi-line record".to_string(),
            ));
        }
        line.push(b'\n');

        let path = self.thread_path(&checkpoint.thread_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if let Some(valid_len) = torn_at {
            file.set_len(valid_len).await?;
        }

        file.write_all(&line).await?;
        file.sync_data().await?;

        tracing::trace!(
            thread_id = %checkpoint.thread_id,
            sequence = checkpoint.sequence,
            "Appended checkpoint"
        );
        tails.insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let mut tails = self.tails.lock().await;
        if let Some(tail) = tails.get(thread_id) {
            return Ok(Some(tail.clone()));
        }

        let latest = self
            .load(thread_id)
            .await?
            .and_then(|mut log| log.checkpoints.pop());
        if let Some(checkpoint) = &latest {
            tails.insert(thread_id.to_string(), checkpoint.clone());
        }
        Ok(latest)
    }

    async fn list(&self, thread_id: &str) -> Result<CheckpointStream> {
        let checkpoints = self
            .load(thread_id)
            .await?
            .map(|log| log.checkpoints)
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(checkpoints.into_iter().map(Ok))))
    }

    async fn thread(&self, thread_id: &str) -> Result<Option<ThreadInfo>> {
        let Some(log) = self.load(thread_id).await? else {
            return Ok(None);
        };
        let Some(first) = log.checkpoints.first() else {
            return Ok(None);
        };

        Ok(Some(ThreadInfo {
            thread_id: thread_id.to_string(),
            created_at: first.created_at,
            checkpoint_count: log.checkpoints.len(),
            latest_sequence: log.checkpoints.last().map(|c| c.sequence),
        }))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut threads = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(thread_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_file_stem)
            else {
                continue;
            };

            if let Some(info) = self.thread(&thread_id).await? {
                threads.push(info);
            }
        }

        threads.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(threads)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let mut tails = self.tails.lock().await;
        tails.remove(thread_id);
        match fs::remove_file(self.thread_path(thread_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Percent-encode everything but `[A-Za-z0-9_-]`
pub(crate) fn encode_file_stem(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_file_stem(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).ok()
}
