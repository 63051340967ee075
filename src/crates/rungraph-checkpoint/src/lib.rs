//! # rungraph-checkpoint - Durable State for Agent Runs
//!
//! **Persistence leaves of the rungraph engine**: the per-thread checkpoint log
//! and the long-term memory store. Both are trait-based so the engine never
//! depends on a particular database.
//!
//! ## Overview
//!
//! - **Checkpoint log** - every conversation thread owns an append-only,
//!   totally ordered sequence of [`Checkpoint`]s. The executor appends one
//!   after each superstep and reads the latest to resume.
//! - **Memory store** - namespaced key-value facts ([`MemoryItem`]) that
//!   outlive any single thread. Steps use it as a side channel.
//!
//! ## Core Concepts
//!
//! ### 1. CheckpointSaver Trait
//!
//! [`CheckpointSaver`] backends provide:
//!
//! - **`put()`** - append; rejects any sequence other than `last + 1`
//! - **`latest()`** - read the resume point
//! - **`list()`** - stream history in sequence order
//! - **`thread()` / `list_threads()` / `delete_thread()`** - thread admin
//!
//! ### 2. Checkpoint Structure
//!
//! A [`Checkpoint`] contains:
//! - **Identity** - `thread_id`, `sequence`, `id`, `created_at`
//! - **State** - channel name to JSON value
//! - **Schedule** - `next_steps`; empty means the run ended
//! - **Pause marker** - optional [`PendingInterrupt`]
//! - **Failure marker** - optional [`CheckpointFailure`]
//!
//! ### 3. Backends
//!
//! | Backend | Durable | Use |
//! |---|---|---|
//! | [`InMemoryCheckpointSaver`] | no | tests, ephemeral processes |
//! | [`FileCheckpointSaver`] | yes | single node, survives restarts |
//! | your own | - | implement [`CheckpointSaver`] |
//!
//! Memory stores follow the same split: [`InMemoryMemoryStore`] for tests and
//! [`FileMemoryStore`] for facts that must survive restarts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rungraph_checkpoint::{Checkpoint, CheckpointSaver, InMemoryCheckpointSaver, State};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!
//!     saver.put(Checkpoint::new("thread-123", 0, State::new(), vec!["greet".into()])).await?;
//!     saver.put(Checkpoint::new("thread-123", 1, State::new(), vec![])).await?;
//!
//!     // Gaps are rejected
//!     assert!(saver.put(Checkpoint::new("thread-123", 5, State::new(), vec![])).await.is_err());
//!
//!     let latest = saver.latest("thread-123").await?.expect("thread exists");
//!     assert!(latest.is_terminal());
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod file_store;
pub mod memory;
pub mod serializer;
pub mod store;
pub mod traits;

// Re-export main types
pub use checkpoint::{
    Checkpoint, CheckpointFailure, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointStatus, FailureKind, PendingInterrupt, State, ThreadInfo,
};
pub use error::{CheckpointError, Result, StoreError, StoreResult};
pub use file::FileCheckpointSaver;
pub use file_store::FileMemoryStore;
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use store::{InMemoryMemoryStore, MemoryItem, MemoryStore, Namespace};
pub use traits::{CheckpointSaver, CheckpointStream};
