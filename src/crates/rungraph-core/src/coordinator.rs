//! Run coordinator: the top-level entry point for executing agents
//!
//! [`RunCoordinator`] binds one compiled agent to a checkpoint store and
//! exposes the external operations:
//!
//! - [`invoke`](RunCoordinator::invoke) / [`resume`](RunCoordinator::resume):
//!   run to completion or pause and return the final checkpoint
//! - [`stream`](RunCoordinator::stream) /
//!   [`resume_stream`](RunCoordinator::resume_stream): the same run as a lazy
//!   [`EventStream`]
//! - [`history`](RunCoordinator::history), [`state`](RunCoordinator::state),
//!   [`threads`](RunCoordinator::threads),
//!   [`delete_thread`](RunCoordinator::delete_thread)
//!
//! # Concurrency
//!
//! At most one run is active per thread. A second call for a busy thread fails
//! immediately with [`UsageError::RunInProgress`]; runs on different threads
//! proceed independently.
//!
//! # Streaming
//!
//! Streams are driven by the consumer. The run future is polled from inside the
//! stream, so nothing executes while the consumer is not reading, and dropping
//! the stream cancels the run: the in-flight superstep is abandoned without a
//! checkpoint and the thread is unlocked.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use rungraph_core::{EngineConfig, Event, RunCoordinator, StepOutput, StepRegistry};
//! use rungraph_checkpoint::InMemoryCheckpointSaver;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> rungraph_core::Result<()> {
//! let mut builder = StepRegistry::builder("approval");
//! builder.add_step("ask_human", |ctx| {
//!     Box::pin(async move {
//!         match ctx.resume_value() {
//!             Some(answer) => Ok(StepOutput::stop().set("answer", answer.clone())),
//!             None => Ok(StepOutput::pause(json!({"question": "confirm?"}))),
//!         }
//!     })
//! });
//!
//! let coordinator = RunCoordinator::new(
//!     builder.compile()?,
//!     Arc::new(InMemoryCheckpointSaver::new()),
//!     Arc::new(EngineConfig::default()),
//! );
//!
//! let mut events = coordinator.stream("t1", json!("hi")).await?;
//! while let Some(event) = events.next().await {
//!     if let Event::Interrupt { payload, .. } = event {
//!         println!("asked: {}", payload);
//!     }
//! }
//!
//! let done = coordinator.resume("t1", json!("yes")).await?;
//! assert_eq!(done.state["answer"], json!("yes"));
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::error::{Result, UsageError};
use crate::event::{Event, EventSink, EventStream};
use crate::executor::{GraphExecutor, RunInput};
use crate::registry::StepRegistry;
use parking_lot::Mutex;
use rungraph_checkpoint::{Checkpoint, CheckpointSaver, MemoryStore, ThreadInfo};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Set of threads with an active run
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `thread_id` until the returned guard is dropped.
    pub fn acquire(&self, thread_id: &str) -> std::result::Result<RunGuard, UsageError> {
        if !self.active.lock().insert(thread_id.to_string()) {
            return Err(UsageError::RunInProgress {
                thread_id: thread_id.to_string(),
            });
        }
        debug!(thread_id, "Run lock acquired");
        Ok(RunGuard {
            active: self.active.clone(),
            thread_id: thread_id.to_string(),
        })
    }

    pub fn is_active(&self, thread_id: &str) -> bool {
        self.active.lock().contains(thread_id)
    }
}

/// Releases a thread's run lock on drop
#[derive(Debug)]
pub struct RunGuard {
    active: Arc<Mutex<HashSet<String>>>,
    thread_id: String,
}

impl RunGuard {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.thread_id);
        debug!(thread_id = %self.thread_id, "Run lock released");
    }
}

enum Progress {
    Event(Event),
    Done(Result<Checkpoint>),
}

/// Top-level entry point binding an agent to its stores
pub struct RunCoordinator {
    registry: Arc<StepRegistry>,
    executor: GraphExecutor,
    locks: RunLocks,
}

impl RunCoordinator {
    pub fn new(
        registry: StepRegistry,
        checkpointer: Arc<dyn CheckpointSaver>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            executor: GraphExecutor::new(checkpointer, config),
            locks: RunLocks::new(),
        }
    }

    /// Make a long-term memory store available to steps
    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.executor = self.executor.with_store(store);
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    pub fn is_running(&self, thread_id: &str) -> bool {
        self.locks.is_active(thread_id)
    }

    /// Run `thread_id` with `input` until it completes or pauses.
    ///
    /// # Errors
    ///
    /// - [`UsageError::RunInProgress`] if the thread is busy
    /// - [`UsageError::PendingInterrupt`] if the thread is paused
    /// - [`GraphError::StepExecution`](crate::GraphError::StepExecution) /
    ///   [`GraphError::RunawayExecution`](crate::GraphError::RunawayExecution)
    ///   after the failed checkpoint has been stored
    /// - [`GraphError::Persistence`](crate::GraphError::Persistence) if the checkpoint store fails
    #[tracing::instrument(skip(self, input), fields(graph = %self.registry.name()))]
    pub async fn invoke(&self, thread_id: &str, input: Value) -> Result<Checkpoint> {
        let _guard = self.locks.acquire(thread_id)?;
        let checkpoint = self
            .executor
            .run(&self.registry, thread_id, input, &EventSink::discard())
            .await?;
        self.finish(checkpoint)
    }

    /// Like [`invoke`](Self::invoke), but returns the run as a lazy event
    /// stream. Usage errors are returned before any event.
    pub async fn stream(&self, thread_id: &str, input: Value) -> Result<EventStream> {
        let guard = self.locks.acquire(thread_id)?;
        let latest = self.executor.checkpointer().latest(thread_id).await?;
        if let Some(interrupt) = latest.as_ref().and_then(|c| c.pending_interrupt.as_ref()) {
            return Err(UsageError::PendingInterrupt {
                thread_id: thread_id.to_string(),
                step: interrupt.step.clone(),
            }
            .into());
        }

        info!(thread_id, graph = %self.registry.name(), "Streaming run");
        let registry = self.registry.clone();
        let executor = self.executor.clone();
        let thread_id = thread_id.to_string();
        Ok(event_stream(guard, move |sink| async move {
            executor
                .run_from(&registry, &thread_id, latest, RunInput::Merge(input), &sink)
                .await
        }))
    }

    /// Resume a paused thread with `value` until it completes or pauses again.
    ///
    /// # Errors
    ///
    /// [`UsageError::NoPendingInterrupt`] if the thread's latest checkpoint is
    /// not paused; otherwise as [`invoke`](Self::invoke).
    #[tracing::instrument(skip(self, value), fields(graph = %self.registry.name()))]
    pub async fn resume(&self, thread_id: &str, value: Value) -> Result<Checkpoint> {
        let _guard = self.locks.acquire(thread_id)?;
        let paused = self.paused_checkpoint(thread_id).await?;
        let checkpoint = self
            .executor
            .continue_from(&self.registry, paused, Some(value), &EventSink::discard())
            .await?;
        self.finish(checkpoint)
    }

    /// Streaming form of [`resume`](Self::resume)
    pub async fn resume_stream(&self, thread_id: &str, value: Value) -> Result<EventStream> {
        let guard = self.locks.acquire(thread_id)?;
        let paused = self.paused_checkpoint(thread_id).await?;

        info!(thread_id, graph = %self.registry.name(), "Streaming resumed run");
        let registry = self.registry.clone();
        let executor = self.executor.clone();
        Ok(event_stream(guard, move |sink| async move {
            executor
                .continue_from(&registry, paused, Some(value), &sink)
                .await
        }))
    }

    /// All checkpoints of a thread in sequence order
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(self.executor.checkpointer().history(thread_id).await?)
    }

    /// Latest checkpoint of a thread
    pub async fn state(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.executor.checkpointer().latest(thread_id).await?)
    }

    pub async fn threads(&self) -> Result<Vec<ThreadInfo>> {
        Ok(self.executor.checkpointer().list_threads().await?)
    }

    /// Delete a thread together with the sub-threads of its delegated runs.
    ///
    /// Refused with [`UsageError::RunInProgress`] while the thread is running.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(thread_id)?;
        let checkpointer = self.executor.checkpointer();

        let prefix = format!("{}/", thread_id);
        for child in checkpointer.list_threads().await? {
            if child.thread_id.starts_with(&prefix) {
                checkpointer.delete_thread(&child.thread_id).await?;
            }
        }

        let deleted = checkpointer.delete_thread(thread_id).await?;
        info!(thread_id, deleted, "Thread deleted");
        Ok(deleted)
    }

    async fn paused_checkpoint(&self, thread_id: &str) -> Result<Checkpoint> {
        match self.executor.checkpointer().latest(thread_id).await? {
            Some(checkpoint) if checkpoint.is_paused() => Ok(checkpoint),
            _ => Err(UsageError::NoPendingInterrupt {
                thread_id: thread_id.to_string(),
            }
            .into()),
        }
    }

    fn finish(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        match self.executor.failure_error(&checkpoint) {
            Some(err) => Err(err),
            None => Ok(checkpoint),
        }
    }
}

impl std::fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .field("locks", &self.locks)
            .finish()
    }
}

/// Drive `run` from inside the returned stream, yielding events as the run
/// emits them. The guard lives as long as the stream.
fn event_stream<F, Fut>(guard: RunGuard, run: F) -> EventStream
where
    F: FnOnce(EventSink) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Checkpoint>> + Send + 'static,
{
    let (sink, mut rx) = EventSink::channel();

    Box::pin(async_stream::stream! {
        let _guard = guard;
        let run = run(sink);
        tokio::pin!(run);

        let outcome = loop {
            let progress = tokio::select! {
                biased;
                Some(event) = rx.recv() => Progress::Event(event),
                outcome = &mut run => Progress::Done(outcome),
            };
            match progress {
                Progress::Event(event) => yield event,
                Progress::Done(outcome) => break outcome,
            }
        };

        while let Ok(event) = rx.try_recv() {
            yield event;
        }

        if let Err(err) = outcome {
            yield Event::Error {
                kind: err.kind(),
                step: None,
                message: err.to_string(),
            };
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lock_is_exclusive_per_thread() {
        let locks = RunLocks::new();

        let guard = locks.acquire("t1").unwrap();
        assert_eq!(guard.thread_id(), "t1");
        assert!(locks.is_active("t1"));
        assert_eq!(
            locks.acquire("t1").unwrap_err(),
            UsageError::RunInProgress {
                thread_id: "t1".to_string()
            }
        );

        let other = locks.acquire("t2").unwrap();
        drop(guard);
        assert!(!locks.is_active("t1"));
        assert!(locks.acquire("t1").is_ok());
        drop(other);
    }

    #[test]
    fn test_guard_release_is_shared_across_clones() {
        let locks = RunLocks::new();
        let clone = locks.clone();

        let guard = clone.acquire("t").unwrap();
        assert!(locks.acquire("t").is_err());
        drop(guard);
        assert!(locks.acquire("t").is_ok());
    }
}
