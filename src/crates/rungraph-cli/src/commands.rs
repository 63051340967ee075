//! Subcommand implementations
//!
//! Every command writes JSON lines to the given writer: one event per line
//! when streaming, one checkpoint summary per line otherwise.

use crate::agents::DemoAgent;
use anyhow::{bail, Context};
use futures::StreamExt;
use rungraph_checkpoint::{
    CheckpointSaver, FileCheckpointSaver, FileMemoryStore, InMemoryCheckpointSaver,
    InMemoryMemoryStore, MemoryStore,
};
use rungraph_core::{
    Checkpoint, CheckpointBackend, CheckpointConfig, EngineConfig, Event, EventStream,
    MemoryBackend, MemoryConfig, RunCoordinator,
};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Open the checkpoint store named by the configuration
pub async fn open_checkpointer(
    config: &CheckpointConfig,
) -> anyhow::Result<Arc<dyn CheckpointSaver>> {
    match config.backend {
        CheckpointBackend::Memory => {
            warn!("Using the in-memory checkpoint backend; runs will not survive this process");
            Ok(Arc::new(InMemoryCheckpointSaver::new()))
        }
        CheckpointBackend::File => {
            let saver = FileCheckpointSaver::open(&config.path).await.with_context(|| {
                format!("failed to open checkpoints at {}", config.path.display())
            })?;
            Ok(Arc::new(saver))
        }
    }
}

/// Open the long-term memory store named by the configuration
pub async fn open_memory_store(config: &MemoryConfig) -> anyhow::Result<Arc<dyn MemoryStore>> {
    match config.backend {
        MemoryBackend::Memory => Ok(Arc::new(InMemoryMemoryStore::new())),
        MemoryBackend::File => {
            let store = FileMemoryStore::open(&config.path).await.with_context(|| {
                format!("failed to open memory store at {}", config.path.display())
            })?;
            Ok(Arc::new(store))
        }
    }
}

/// Command-line values are JSON when they parse as JSON, plain text otherwise
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn summary(checkpoint: &Checkpoint) -> Value {
    let mut summary = json!({
        "thread_id": checkpoint.thread_id,
        "sequence": checkpoint.sequence,
        "status": checkpoint.status(),
        "steps": checkpoint.metadata.steps,
        "next_steps": checkpoint.next_steps,
        "state": checkpoint.state,
    });
    if let Some(interrupt) = &checkpoint.pending_interrupt {
        summary["interrupt"] = json!({"step": interrupt.step, "payload": interrupt.payload});
    }
    if let Some(failure) = &checkpoint.error {
        summary["error"] = json!(failure);
    }
    summary
}

/// One agent bound to one checkpoint store
pub struct Session {
    coordinator: RunCoordinator,
}

impl Session {
    pub fn new(coordinator: RunCoordinator) -> Self {
        Self { coordinator }
    }

    pub async fn open(config: EngineConfig, agent: DemoAgent) -> anyhow::Result<Self> {
        let checkpointer = open_checkpointer(&config.checkpoint).await?;
        let store = open_memory_store(&config.memory).await?;
        let registry = agent.build()?;
        info!(agent = ?agent, graph = %registry.name(), "Session opened");

        let coordinator =
            RunCoordinator::new(registry, checkpointer, Arc::new(config)).with_store(store);
        Ok(Self::new(coordinator))
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    pub async fn run<W: Write>(
        &self,
        out: &mut W,
        thread_id: &str,
        input: Value,
        stream: bool,
    ) -> anyhow::Result<()> {
        if stream {
            let events = self.coordinator.stream(thread_id, input).await?;
            return write_events(out, events).await;
        }
        let checkpoint = self.coordinator.invoke(thread_id, input).await?;
        writeln!(out, "{}", summary(&checkpoint))?;
        Ok(())
    }

    pub async fn resume<W: Write>(
        &self,
        out: &mut W,
        thread_id: &str,
        value: Value,
        stream: bool,
    ) -> anyhow::Result<()> {
        if stream {
            let events = self.coordinator.resume_stream(thread_id, value).await?;
            return write_events(out, events).await;
        }
        let checkpoint = self.coordinator.resume(thread_id, value).await?;
        writeln!(out, "{}", summary(&checkpoint))?;
        Ok(())
    }

    pub async fn history<W: Write>(&self, out: &mut W, thread_id: &str) -> anyhow::Result<()> {
        let history = self.coordinator.history(thread_id).await?;
        if history.is_empty() {
            bail!("thread '{}' has no checkpoints", thread_id);
        }
        for checkpoint in &history {
            writeln!(out, "{}", summary(checkpoint))?;
        }
        Ok(())
    }

    pub async fn threads<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        for thread in self.coordinator.threads().await? {
            writeln!(out, "{}", serde_json::to_string(&thread)?)?;
        }
        Ok(())
    }

    pub async fn delete<W: Write>(&self, out: &mut W, thread_id: &str) -> anyhow::Result<()> {
        let deleted = self.coordinator.delete_thread(thread_id).await?;
        writeln!(out, "{}", json!({"thread_id": thread_id, "deleted": deleted}))?;
        Ok(())
    }
}

async fn write_events<W: Write>(out: &mut W, mut events: EventStream) -> anyhow::Result<()> {
    let mut failure = None;
    while let Some(event) = events.next().await {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
        if let Event::Error { message, .. } = event {
            failure = Some(message);
        }
    }
    match failure {
        Some(message) => bail!("run failed: {}", message),
        None => Ok(()),
    }
}
