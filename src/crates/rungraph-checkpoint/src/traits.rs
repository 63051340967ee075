//! Extensible checkpoint storage trait for custom backend implementations
//!
//! This module defines the **[`CheckpointSaver`]** trait, the abstraction every
//! checkpoint persistence backend implements. The engine talks to storage only
//! through this trait, so a thread's log can live in memory, in files, or in a
//! database without the executor knowing.
//!
//! # Contract
//!
//! A thread's checkpoints form an append-only log ordered by
//! [`Checkpoint::sequence`]:
//!
//! - **`put()`** appends. The first checkpoint of a thread must carry sequence
//!   `0`; every later one must carry exactly `last + 1`. Anything else is
//!   rejected with [`CheckpointError::SequenceConflict`] and the store is left
//!   untouched. This optimistic guard is what makes two writers on one thread
//!   detectable.
//! - **`latest()`** returns the highest-sequence checkpoint, if any.
//! - **`list()`** streams the log in ascending sequence order (history replay).
//! - **`delete_thread()`** is the only way a thread disappears.
//!
//! ```text
//! thread "t1":  [seq 0] -> [seq 1] -> [seq 2]      put(seq 3) ok
//!                                                  put(seq 5) SequenceConflict
//!                                                  put(seq 2) SequenceConflict
//! ```
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync` and tolerate concurrent calls for
//! different threads without coordination from the caller. Data for different
//! thread ids is disjoint by key.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use rungraph_checkpoint::{Checkpoint, CheckpointSaver, CheckpointStream, Result, ThreadInfo};
//! use async_trait::async_trait;
//!
//! pub struct PostgresCheckpointSaver { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl CheckpointSaver for PostgresCheckpointSaver {
//!     async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
//!         // INSERT ... WHERE (SELECT max(sequence) ...) = $seq - 1
//!         todo!()
//!     }
//!
//!     async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> { todo!() }
//!     async fn list(&self, thread_id: &str) -> Result<CheckpointStream> { todo!() }
//!     async fn thread(&self, thread_id: &str) -> Result<Option<ThreadInfo>> { todo!() }
//!     async fn list_threads(&self) -> Result<Vec<ThreadInfo>> { todo!() }
//!     async fn delete_thread(&self, thread_id: &str) -> Result<bool> { todo!() }
//! }
//! ```

use crate::{
    checkpoint::{Checkpoint, ThreadInfo},
    error::{CheckpointError, Result},
};
use async_trait::async_trait;
use futures::stream::{Stream, TryStreamExt};
use std::pin::Pin;

/// Type alias for async stream of checkpoints
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<Checkpoint>> + Send + 'static>>;

/// Core trait for checkpoint storage backends
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Append a checkpoint to its thread's log.
    ///
    /// Fails with [`CheckpointError::SequenceConflict`] unless
    /// `checkpoint.sequence` is exactly one past the thread's latest sequence
    /// (or `0` for a new thread).
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Highest-sequence checkpoint of the thread
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// The thread's full log in ascending sequence order
    async fn list(&self, thread_id: &str) -> Result<CheckpointStream>;

    /// Thread summary, `None` if the thread has no checkpoints
    async fn thread(&self, thread_id: &str) -> Result<Option<ThreadInfo>>;

    /// All known threads
    async fn list_threads(&self) -> Result<Vec<ThreadInfo>>;

    /// Remove a thread and its log. Returns `false` if it did not exist.
    async fn delete_thread(&self, thread_id: &str) -> Result<bool>;

    /// Collect [`list`](Self::list) into a vector.
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        self.list(thread_id).await?.try_collect().await
    }
}

/// Validate that `checkpoint` may be appended after `last`.
///
/// Shared by the bundled backends so they enforce an identical guard.
pub fn check_append(last: Option<u64>, checkpoint: &Checkpoint) -> Result<()> {
    if checkpoint.thread_id.is_empty() {
        return Err(CheckpointError::Invalid("thread_id is required".to_string()));
    }

    let expected = last.map(|seq| seq + 1).unwrap_or(0);
    if checkpoint.sequence != expected {
        return Err(CheckpointError::SequenceConflict {
            thread_id: checkpoint.thread_id.clone(),
            expected,
            actual: checkpoint.sequence,
        });
    }

    Ok(())
}
