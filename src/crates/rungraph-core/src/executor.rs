//! Graph executor: the resumable superstep state machine
//!
//! A run advances in **supersteps**. Each superstep executes every scheduled
//! step against the same state snapshot, merges their deltas through the
//! channel policies, resolves their routing decisions into the next schedule,
//! and appends exactly one checkpoint. A run ends when a superstep leaves
//! nothing scheduled (completed), pauses on an interrupt, fails, or exceeds
//! `execution.max_supersteps`.
//!
//! ```text
//! latest checkpoint ──► superstep ──► put(seq + 1) ──► paused / terminal?
//!        ▲                                                   │ no
//!        └───────────────────────────────────────────────────┘
//! ```
//!
//! # Failure
//!
//! A failing step (or a failed merge or route) abandons the superstep: its
//! deltas are discarded and a terminal-failed checkpoint carrying the prior
//! state is appended instead. Persistence errors abort the run without writing
//! anything further.
//!
//! # Pausing
//!
//! A step returning [`Route::Pause`] stops the run after its superstep. The
//! checkpoint records the first pausing step as `pending_interrupt` and keeps
//! every pausing step scheduled ahead of the other routing targets, so resuming
//! re-enters exactly the interrupted step with the caller's value.

use crate::config::EngineConfig;
use crate::error::{BoxError, GraphError, Result, UsageError};
use crate::event::{Event, EventSink};
use crate::registry::StepRegistry;
use crate::step::{Route, StepContext};
use futures::future::join_all;
use futures::FutureExt;
use rungraph_checkpoint::{
    Checkpoint, CheckpointFailure, CheckpointMetadata, CheckpointSaver, CheckpointSource,
    CheckpointStatus, FailureKind, MemoryStore, PendingInterrupt, State,
};
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How run input enters the state
#[derive(Debug, Clone)]
pub(crate) enum RunInput {
    /// Merged into the latest state through the channel policies
    Merge(Value),
    /// Replaces the state outright and always starts at the entry step
    Seed(State),
}

/// Position a run continues from
struct Cursor {
    thread_id: String,
    /// Sequence of the next checkpoint to append
    sequence: u64,
    state: State,
    schedule: Vec<String>,
    interrupt: Option<PendingInterrupt>,
}

impl Cursor {
    fn after(checkpoint: &Checkpoint) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            sequence: checkpoint.sequence + 1,
            state: checkpoint.state.clone(),
            schedule: checkpoint.next_steps.clone(),
            interrupt: checkpoint.pending_interrupt.clone(),
        }
    }
}

/// Executes registries against a checkpoint store
///
/// Cheap to clone; clones share the store, memory store and configuration.
#[derive(Clone)]
pub struct GraphExecutor {
    checkpointer: Arc<dyn CheckpointSaver>,
    store: Option<Arc<dyn MemoryStore>>,
    config: Arc<EngineConfig>,
}

impl GraphExecutor {
    pub fn new(checkpointer: Arc<dyn CheckpointSaver>, config: Arc<EngineConfig>) -> Self {
        Self {
            checkpointer,
            store: None,
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn checkpointer(&self) -> &Arc<dyn CheckpointSaver> {
        &self.checkpointer
    }

    pub fn store(&self) -> Option<&Arc<dyn MemoryStore>> {
        self.store.as_ref()
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Advance a stored checkpoint until the run completes, pauses or fails.
    ///
    /// Every superstep is appended to the checkpoint store. Returns the last
    /// checkpoint written (or `checkpoint` itself when nothing was scheduled)
    /// together with the events the run produced, in order.
    ///
    /// # Errors
    ///
    /// - [`UsageError::MissingResumeValue`] if `checkpoint` is paused and no
    ///   value is given
    /// - [`UsageError::UnexpectedResumeValue`] if a value is given but
    ///   `checkpoint` is not paused
    /// - [`GraphError::Persistence`] if the store fails
    ///
    /// Step failures are not errors here: they yield a terminal-failed
    /// checkpoint and an `error` event.
    pub async fn advance(
        &self,
        registry: &StepRegistry,
        checkpoint: &Checkpoint,
        resume: Option<Value>,
    ) -> Result<(Checkpoint, Vec<Event>)> {
        let (sink, mut rx) = EventSink::channel();
        let result = self
            .continue_from(registry, checkpoint.clone(), resume, &sink)
            .await;
        drop(sink);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        result.map(|checkpoint| (checkpoint, events))
    }

    /// Start a run on `thread_id` from fresh input.
    pub async fn run(
        &self,
        registry: &StepRegistry,
        thread_id: &str,
        input: Value,
        sink: &EventSink,
    ) -> Result<Checkpoint> {
        let latest = self.checkpointer.latest(thread_id).await?;
        self.run_from(registry, thread_id, latest, RunInput::Merge(input), sink)
            .await
    }

    /// Start a run given the thread's already-loaded latest checkpoint.
    #[tracing::instrument(
        skip(self, registry, latest, input, sink),
        fields(graph = %registry.name())
    )]
    pub(crate) async fn run_from(
        &self,
        registry: &StepRegistry,
        thread_id: &str,
        latest: Option<Checkpoint>,
        input: RunInput,
        sink: &EventSink,
    ) -> Result<Checkpoint> {
        let (sequence, mut state, schedule) = match (latest, &input) {
            (None, _) => (0, State::new(), vec![registry.entry().to_string()]),
            (Some(latest), RunInput::Seed(_)) => {
                (latest.sequence + 1, State::new(), vec![registry.entry().to_string()])
            }
            (Some(latest), RunInput::Merge(_)) => match latest.status() {
                CheckpointStatus::Paused => {
                    let step = latest
                        .pending_interrupt
                        .map(|interrupt| interrupt.step)
                        .unwrap_or_default();
                    return Err(UsageError::PendingInterrupt {
                        thread_id: thread_id.to_string(),
                        step,
                    }
                    .into());
                }
                CheckpointStatus::Running => {
                    warn!(
                        sequence = latest.sequence,
                        next_steps = ?latest.next_steps,
                        "Recovering interrupted run"
                    );
                    (latest.sequence + 1, latest.state, latest.next_steps)
                }
                CheckpointStatus::Completed | CheckpointStatus::Failed => (
                    latest.sequence + 1,
                    latest.state,
                    vec![registry.entry().to_string()],
                ),
            },
        };

        match input {
            RunInput::Merge(input) => {
                let delta = self.input_delta(registry, input);
                registry
                    .channels()
                    .apply(&mut state, delta)
                    .map_err(|e| GraphError::Validation(format!("invalid run input: {}", e)))?;
            }
            RunInput::Seed(seed) => state = seed,
        }

        info!(sequence, "Run started");
        let cursor = Cursor {
            thread_id: thread_id.to_string(),
            sequence,
            state,
            schedule,
            interrupt: None,
        };
        self.drive(registry, cursor, None, CheckpointSource::Input, sink)
            .await
    }

    /// Continue from a stored checkpoint: resume a pause, recover a crashed
    /// run, or return a terminal checkpoint unchanged.
    #[tracing::instrument(
        skip(self, registry, checkpoint, resume, sink),
        fields(graph = %registry.name(), thread_id = %checkpoint.thread_id)
    )]
    pub(crate) async fn continue_from(
        &self,
        registry: &StepRegistry,
        checkpoint: Checkpoint,
        resume: Option<Value>,
        sink: &EventSink,
    ) -> Result<Checkpoint> {
        let source = match (&checkpoint.pending_interrupt, &resume) {
            (Some(interrupt), None) => {
                return Err(UsageError::MissingResumeValue {
                    step: interrupt.step.clone(),
                }
                .into())
            }
            (None, Some(_)) => return Err(UsageError::UnexpectedResumeValue.into()),
            (Some(interrupt), Some(_)) => {
                info!(step = %interrupt.step, sequence = checkpoint.sequence, "Resuming run");
                CheckpointSource::Resume
            }
            (None, None) => CheckpointSource::Loop,
        };

        if checkpoint.next_steps.is_empty() {
            return Ok(checkpoint);
        }

        let cursor = Cursor::after(&checkpoint);
        self.drive(registry, cursor, resume, source, sink).await
    }

    async fn drive(
        &self,
        registry: &StepRegistry,
        mut cursor: Cursor,
        mut resume: Option<Value>,
        mut source: CheckpointSource,
        sink: &EventSink,
    ) -> Result<Checkpoint> {
        let limit = self.config.execution.max_supersteps;
        let mut superstep = 0usize;

        loop {
            let outcome = if superstep >= limit {
                Err(GraphError::RunawayExecution { limit })
            } else {
                self.superstep(registry, &cursor, resume.take(), superstep, source, sink)
                    .await
            };

            let checkpoint = match outcome {
                Ok(checkpoint) => checkpoint,
                Err(err) => match failure_of(&err) {
                    Some(failure) => return self.fail(cursor, superstep, failure, err, sink).await,
                    None => return Err(err),
                },
            };

            self.checkpointer.put(checkpoint.clone()).await?;
            debug!(
                thread_id = %checkpoint.thread_id,
                superstep,
                sequence = checkpoint.sequence,
                next_steps = ?checkpoint.next_steps,
                "Checkpoint saved"
            );

            if let Some(interrupt) = &checkpoint.pending_interrupt {
                info!(
                    thread_id = %checkpoint.thread_id,
                    step = %interrupt.step,
                    sequence = checkpoint.sequence,
                    "Run paused"
                );
                if !sink.is_nested() {
                    sink.emit(Event::Interrupt {
                        step: interrupt.step.clone(),
                        payload: interrupt.payload.clone(),
                    });
                }
                return Ok(checkpoint);
            }
            if checkpoint.next_steps.is_empty() {
                info!(
                    thread_id = %checkpoint.thread_id,
                    sequence = checkpoint.sequence,
                    supersteps = superstep + 1,
                    "Run completed"
                );
                return Ok(checkpoint);
            }

            cursor = Cursor::after(&checkpoint);
            source = CheckpointSource::Loop;
            superstep += 1;
        }
    }

    /// Run one superstep and build (but do not store) its checkpoint.
    async fn superstep(
        &self,
        registry: &StepRegistry,
        cursor: &Cursor,
        resume: Option<Value>,
        superstep: usize,
        source: CheckpointSource,
        sink: &EventSink,
    ) -> Result<Checkpoint> {
        let schedule = dedup(cursor.schedule.iter().cloned());
        let snapshot = Arc::new(cursor.state.clone());
        let channels = Arc::new(registry.channels().clone());
        let interrupted = cursor.interrupt.as_ref().map(|i| i.step.as_str());
        debug!(thread_id = %cursor.thread_id, superstep, steps = ?schedule, "Running superstep");

        let runs = schedule.iter().map(|name| {
            let step = registry.step(name).cloned();
            let resume = if interrupted == Some(name.as_str()) {
                resume.clone()
            } else {
                None
            };
            let ctx = StepContext::new(
                cursor.thread_id.as_str(),
                name.as_str(),
                superstep,
                snapshot.clone(),
                channels.clone(),
                resume,
                sink.clone(),
                self.clone(),
            );
            async move {
                let step = step.ok_or_else(|| {
                    GraphError::step_execution(name.as_str(), format!("unknown step '{}'", name))
                })?;

                sink.emit(Event::StepStart {
                    step: name.clone(),
                    superstep,
                });
                debug!(step = %name, superstep, "Step started");

                let output = AssertUnwindSafe(step.run(ctx))
                    .catch_unwind()
                    .await
                    .map_err(|payload| {
                        let message = panic_message(payload.as_ref());
                        warn!(step = %name, superstep, panic = %message, "Step panicked");
                        GraphError::step_execution(
                            name.as_str(),
                            format!("step panicked: {}", message),
                        )
                    })?
                    .map_err(|e| {
                        warn!(step = %name, superstep, error = %e, "Step failed");
                        step_error(name, e)
                    })?;

                sink.emit(Event::StepEnd {
                    step: name.clone(),
                    result: Some(Value::Object(output.delta.clone())),
                });
                Ok::<_, GraphError>(output)
            }
        });
        let outputs = join_all(runs).await;

        let mut writes = Vec::with_capacity(schedule.len());
        let mut paused: Vec<(String, Value)> = Vec::new();
        let mut targets = Vec::new();
        for (name, output) in schedule.iter().zip(outputs) {
            let output = output?;
            match output.route {
                Route::Goto(next) => {
                    if let Some(unknown) = next.iter().find(|n| !registry.contains(n)) {
                        return Err(GraphError::step_execution(
                            name.as_str(),
                            format!("routed to unknown step '{}'", unknown),
                        ));
                    }
                    targets.extend(next);
                }
                Route::Continue => targets.extend(registry.edges_from(name).iter().cloned()),
                Route::Stop => {}
                Route::Pause(payload) => paused.push((name.clone(), payload)),
            }
            writes.push((name.clone(), output.delta));
        }

        let mut state = cursor.state.clone();
        registry
            .channels()
            .apply_superstep(&mut state, writes)
            .map_err(|(step, e)| GraphError::step_execution(step, e))?;

        let next_steps = dedup(
            paused
                .iter()
                .map(|(step, _)| step.clone())
                .chain(targets),
        );
        let metadata = CheckpointMetadata::new()
            .with_source(source)
            .with_superstep(superstep)
            .with_steps(schedule);
        let mut checkpoint =
            Checkpoint::new(cursor.thread_id.as_str(), cursor.sequence, state, next_steps)
                .with_metadata(metadata);

        if let Some((step, payload)) = paused.into_iter().next() {
            checkpoint = checkpoint.with_interrupt(PendingInterrupt::new(step, payload));
        }
        Ok(checkpoint)
    }

    /// Append a terminal-failed checkpoint carrying the pre-superstep state.
    async fn fail(
        &self,
        cursor: Cursor,
        superstep: usize,
        failure: CheckpointFailure,
        err: GraphError,
        sink: &EventSink,
    ) -> Result<Checkpoint> {
        error!(
            thread_id = %cursor.thread_id,
            superstep,
            step = ?failure.step,
            error = %err,
            "Run failed"
        );

        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Failure)
            .with_superstep(superstep);
        let checkpoint = Checkpoint::new(cursor.thread_id, cursor.sequence, cursor.state, vec![])
            .with_failure(failure.clone())
            .with_metadata(metadata);
        self.checkpointer.put(checkpoint.clone()).await?;

        if !sink.is_nested() {
            sink.emit(Event::Error {
                kind: err.kind(),
                step: failure.step,
                message: err.to_string(),
            });
        }
        Ok(checkpoint)
    }

    fn input_delta(&self, registry: &StepRegistry, input: Value) -> State {
        match input {
            Value::Object(delta) => delta,
            Value::Null => State::new(),
            other => {
                let channel = registry
                    .input_channel()
                    .unwrap_or(&self.config.execution.input_channel);
                let mut delta = State::new();
                delta.insert(channel.to_string(), other);
                delta
            }
        }
    }

    /// Error a caller should see for a terminal-failed checkpoint
    pub fn failure_error(&self, checkpoint: &Checkpoint) -> Option<GraphError> {
        let failure = checkpoint.error.as_ref()?;
        Some(match failure.kind {
            FailureKind::StepExecution => GraphError::StepExecution {
                step: failure.step.clone().unwrap_or_default(),
                error: failure.message.clone(),
            },
            FailureKind::RunawayExecution => GraphError::RunawayExecution {
                limit: self.config.execution.max_supersteps,
            },
        })
    }
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// Failure record for errors that end a run with a failed checkpoint
fn failure_of(err: &GraphError) -> Option<CheckpointFailure> {
    match err {
        GraphError::StepExecution { step, error } => Some(CheckpointFailure {
            kind: FailureKind::StepExecution,
            step: Some(step.clone()),
            message: error.clone(),
        }),
        GraphError::RunawayExecution { .. } => Some(CheckpointFailure {
            kind: FailureKind::RunawayExecution,
            step: None,
            message: err.to_string(),
        }),
        _ => None,
    }
}

/// A sub-run exceeding the superstep cap fails the parent the same way.
fn step_error(step: &str, err: BoxError) -> GraphError {
    match err.downcast::<GraphError>() {
        Ok(err) if matches!(*err, GraphError::RunawayExecution { .. }) => *err,
        Ok(err) => GraphError::step_execution(step, err),
        Err(err) => GraphError::step_execution(step, err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn dedup(steps: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    steps
        .into_iter()
        .filter(|step| seen.insert(step.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MergePolicy;
    use crate::step::StepOutput;
    use rungraph_checkpoint::InMemoryCheckpointSaver;
    use serde_json::json;

    fn executor(max_supersteps: usize) -> (GraphExecutor, Arc<InMemoryCheckpointSaver>) {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let config = Arc::new(EngineConfig::default().with_max_supersteps(max_supersteps));
        (GraphExecutor::new(saver.clone(), config), saver)
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let steps = ["b", "a", "b", "c", "a"].map(String::from);
        assert_eq!(dedup(steps), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_fan_out_merges_in_schedule_order() {
        let mut builder = StepRegistry::builder("fan");
        builder
            .add_channel("results", MergePolicy::Append)
            .add_step("split", |_ctx| {
                Box::pin(async move { Ok(StepOutput::goto(["left", "right", "left"])) })
            })
            .add_step("left", |_ctx| {
                Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(StepOutput::goto(["join"]).set("results", json!(["left"])))
                })
            })
            .add_step("right", |_ctx| {
                Box::pin(async move {
                    Ok(StepOutput::goto(["join"]).set("results", json!(["right"])))
                })
            })
            .add_step("join", |ctx| {
                Box::pin(async move {
                    let count = ctx.get("results").and_then(Value::as_array).map_or(0, Vec::len);
                    Ok(StepOutput::stop().set("count", json!(count)))
                })
            });
        let registry = builder.compile().unwrap();
        let (executor, saver) = executor(25);

        let last = executor
            .run(&registry, "t", Value::Null, &EventSink::discard())
            .await
            .unwrap();

        assert_eq!(last.state["results"], json!(["left", "right"]));
        assert_eq!(last.state["count"], json!(2));

        let history = saver.history("t").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].next_steps, vec!["left", "right"]);
        assert_eq!(history[1].metadata.steps, vec!["left", "right"]);
        assert_eq!(history[1].next_steps, vec!["join"]);
    }

    #[tokio::test]
    async fn test_conflicting_replace_writes_fail_the_superstep() {
        let mut builder = StepRegistry::builder("conflict");
        builder
            .add_step("split", |_ctx| {
                Box::pin(async move { Ok(StepOutput::goto(["a", "b"]).set("seen", json!(true))) })
            })
            .add_step("a", |_ctx| {
                Box::pin(async move { Ok(StepOutput::stop().set("answer", json!(1))) })
            })
            .add_step("b", |_ctx| {
                Box::pin(async move { Ok(StepOutput::stop().set("answer", json!(2))) })
            });
        let registry = builder.compile().unwrap();
        let (executor, _saver) = executor(25);

        let last = executor
            .run(&registry, "t", Value::Null, &EventSink::discard())
            .await
            .unwrap();

        assert!(last.is_failed());
        assert_eq!(last.sequence, 1);
        assert_eq!(last.state.get("answer"), None);
        assert_eq!(last.state["seen"], json!(true));
        let failure = last.error.unwrap();
        assert_eq!(failure.kind, FailureKind::StepExecution);
        assert_eq!(failure.step.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_routing_to_unknown_step_fails_routing_step() {
        let mut builder = StepRegistry::builder("lost");
        builder.add_step("start", |_ctx| {
            Box::pin(async move { Ok(StepOutput::goto(["nowhere"])) })
        });
        let registry = builder.compile().unwrap();
        let (executor, _saver) = executor(25);

        let last = executor
            .run(&registry, "t", Value::Null, &EventSink::discard())
            .await
            .unwrap();

        assert!(last.is_failed());
        assert_eq!(last.sequence, 0);
        assert_eq!(last.error.unwrap().step.as_deref(), Some("start"));
    }

    #[tokio::test]
    async fn test_continue_follows_static_edges() {
        let mut builder = StepRegistry::builder("edges");
        builder
            .add_step("a", |_ctx| {
                Box::pin(async move { Ok(StepOutput::next().set("a", json!(1))) })
            })
            .add_step("b", |_ctx| {
                Box::pin(async move { Ok(StepOutput::next().set("b", json!(2))) })
            })
            .add_edge("a", "b");
        let registry = builder.compile().unwrap();
        let (executor, saver) = executor(25);

        let last = executor
            .run(&registry, "t", Value::Null, &EventSink::discard())
            .await
            .unwrap();

        assert_eq!(last.status(), CheckpointStatus::Completed);
        assert_eq!(last.sequence, 1);
        assert_eq!(saver.history("t").await.unwrap()[0].next_steps, vec!["b"]);
    }

    #[tokio::test]
    async fn test_non_object_input_goes_to_input_channel() {
        let mut builder = StepRegistry::builder("echo");
        builder.add_step("echo", |ctx| {
            Box::pin(async move {
                let input = ctx.get("input").cloned().unwrap_or(Value::Null);
                Ok(StepOutput::stop().set("echo", input))
            })
        });
        let registry = builder.compile().unwrap();
        let (executor, _saver) = executor(25);

        let last = executor
            .run(&registry, "t", json!("hi"), &EventSink::discard())
            .await
            .unwrap();
        assert_eq!(last.state["echo"], json!("hi"));

        let last = executor
            .run(&registry, "t", json!({"input": "again"}), &EventSink::discard())
            .await
            .unwrap();
        assert_eq!(last.sequence, 1);
        assert_eq!(last.state["echo"], json!("again"));
    }

    #[tokio::test]
    async fn test_advance_validates_resume_value() {
        let mut builder = StepRegistry::builder("ask");
        builder.add_step("ask", |ctx| {
            Box::pin(async move {
                match ctx.resume_value() {
                    Some(answer) => Ok(StepOutput::stop().set("answer", answer.clone())),
                    None => Ok(StepOutput::pause(json!({"question": "confirm?"}))),
                }
            })
        });
        let registry = builder.compile().unwrap();
        let (executor, _saver) = executor(25);

        let paused = executor
            .run(&registry, "t", Value::Null, &EventSink::discard())
            .await
            .unwrap();
        assert!(paused.is_paused());

        let err = executor.advance(&registry, &paused, None).await.unwrap_err();
        assert!(matches!(
            err,
            GraphError::Usage(UsageError::MissingResumeValue { .. })
        ));

        let (done, events) = executor
            .advance(&registry, &paused, Some(json!("yes")))
            .await
            .unwrap();
        assert_eq!(done.state["answer"], json!("yes"));
        assert_eq!(done.metadata.source, Some(CheckpointSource::Resume));
        assert_eq!(
            events.last(),
            Some(&Event::StepEnd {
                step: "ask".to_string(),
                result: Some(json!({"answer": "yes"})),
            })
        );

        let err = executor
            .advance(&registry, &done, Some(json!("again")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::Usage(UsageError::UnexpectedResumeValue)
        ));

        let (unchanged, events) = executor.advance(&registry, &done, None).await.unwrap();
        assert_eq!(unchanged.sequence, done.sequence);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_recovers_crashed_run() {
        let mut builder = StepRegistry::builder("recover");
        builder
            .add_step("first", |_ctx| Box::pin(async move { Ok(StepOutput::goto(["second"])) }))
            .add_step("second", |_ctx| {
                Box::pin(async move { Ok(StepOutput::stop().set("done", json!(true))) })
            });
        let registry = builder.compile().unwrap();
        let (executor, saver) = executor(25);

        // A run that died after its first superstep
        saver
            .put(Checkpoint::new("t", 0, State::new(), vec!["second".to_string()]))
            .await
            .unwrap();

        let last = executor
            .run(&registry, "t", Value::Null, &EventSink::discard())
            .await
            .unwrap();
        assert_eq!(last.sequence, 1);
        assert_eq!(last.state["done"], json!(true));
        assert_eq!(last.metadata.steps, vec!["second"]);
    }
}
