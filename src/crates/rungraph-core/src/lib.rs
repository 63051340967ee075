//! # rungraph-core - Resumable Graph Execution for Agent Runs
//!
//! **Execution substrate for multi-step agents**: walks a graph of steps in
//! supersteps, checkpoints after every superstep, pauses for
//! human-in-the-loop input and resumes exactly where it stopped, streams
//! incremental events, and lets one agent delegate to another.
//!
//! ## Overview
//!
//! | Component | Type | Role |
//! |---|---|---|
//! | Step registry | [`StepRegistry`] | step name to step, channel policies, entry, static edges |
//! | Graph executor | [`GraphExecutor`] | superstep loop over a checkpoint store |
//! | Run coordinator | [`RunCoordinator`] | invoke / stream / resume, one run per thread |
//! | Agent composer | [`Agent`], [`Supervisor`], [`DelegateStep`] | sub-runs on isolated threads |
//!
//! Persistence lives in [`rungraph_checkpoint`]: the [`CheckpointSaver`] log
//! and the long-term [`MemoryStore`] steps can use as a side channel.
//!
//! ## Core Concepts
//!
//! ### 1. Steps and routing
//!
//! A step reads a state snapshot and returns a delta plus a [`Route`]:
//! `goto` (fan out to the named steps), `continue` (follow static edges),
//! `pause` (hand a payload to the caller) or `stop`.
//!
//! ### 2. Channels
//!
//! State is a map of channels. Each channel merges writes by
//! [`MergePolicy::Replace`] or [`MergePolicy::Append`], fixed when the graph is
//! defined.
//!
//! ### 3. Checkpoints
//!
//! Every superstep appends one checkpoint with the next sequence number. A
//! thread's latest checkpoint is where its next run or resume starts; a run
//! killed mid-superstep leaves no partial record.
//!
//! ### 4. Events
//!
//! [`Event`]s (`token`, `step_start`, `step_end`, `custom`, `interrupt`,
//! `error`) form one ordered stream per run, including events of delegated
//! sub-runs with qualified step names.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rungraph_checkpoint::InMemoryCheckpointSaver;
//! use rungraph_core::{EngineConfig, RunCoordinator, StepOutput, StepRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rungraph_core::Result<()> {
//!     let mut builder = StepRegistry::builder("greeter");
//!     builder
//!         .add_step("greet", |ctx| {
//!             Box::pin(async move {
//!                 let name = ctx.get("input").cloned().unwrap_or(json!("there"));
//!                 let greeting = json!(format!("hello {}", name));
//!                 Ok(StepOutput::goto(["respond"]).set("greeting", greeting))
//!             })
//!         })
//!         .add_step("respond", |_ctx| {
//!             Box::pin(async move {
//!                 Ok(StepOutput::stop().set("reply", json!("how can I help?")))
//!             })
//!         });
//!
//!     let coordinator = RunCoordinator::new(
//!         builder.compile()?,
//!         Arc::new(InMemoryCheckpointSaver::new()),
//!         Arc::new(EngineConfig::default()),
//!     );
//!
//!     let done = coordinator.invoke("t1", json!("hi")).await?;
//!     assert_eq!(done.sequence, 1);
//!     Ok(())
//! }
//! ```
//!
//! [`CheckpointSaver`]: rungraph_checkpoint::CheckpointSaver
//! [`MemoryStore`]: rungraph_checkpoint::MemoryStore

pub mod channel;
pub mod composer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod executor;
pub mod registry;
pub mod step;

pub use channel::{ChannelError, Channels, MergePolicy};
pub use composer::{
    Agent, DelegateStep, RouterFuture, Supervisor, SupervisorDecision, NEXT_AGENT_CHANNEL,
    SUPERVISOR_STEP,
};
pub use config::{
    CheckpointBackend, CheckpointConfig, EngineConfig, ExecutionConfig, LogFormat, LoggingConfig,
    MemoryBackend, MemoryConfig,
};
pub use coordinator::{RunCoordinator, RunGuard, RunLocks};
pub use error::{BoxError, ErrorKind, GraphError, Result, UsageError};
pub use event::{Event, EventSink, EventStream};
pub use executor::GraphExecutor;
pub use registry::{EdgeDescription, GraphDescription, RegistryBuilder, StepRegistry};
pub use step::{Route, Step, StepContext, StepFuture, StepOutput, StepResult};

pub use rungraph_checkpoint::{Checkpoint, CheckpointStatus, State};
