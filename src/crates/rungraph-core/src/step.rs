//! Steps: the units of work a graph is made of
//!
//! A step receives a [`StepContext`] (a read-only snapshot of the state plus
//! handles for emitting events) and returns a [`StepOutput`]: a state delta and
//! a [`Route`] deciding what runs next.
//!
//! Most steps are closures registered with
//! [`RegistryBuilder::add_step`](crate::RegistryBuilder::add_step). Types with
//! their own configuration (like [`DelegateStep`](crate::DelegateStep))
//! implement [`Step`] directly.
//!
//! ```rust,no_run
//! use rungraph_core::{StepOutput, StepRegistry};
//! use serde_json::json;
//!
//! let mut builder = StepRegistry::builder("echo");
//! builder.add_step("respond", |ctx| {
//!     Box::pin(async move {
//!         let input = ctx.get("input").cloned().unwrap_or(json!(""));
//!         ctx.emit_token("echo: ");
//!         Ok(StepOutput::stop().set("reply", json!({ "echo": input })))
//!     })
//! });
//! ```

use crate::channel::{Channels, MergePolicy};
use crate::error::BoxError;
use crate::event::{Event, EventSink};
use crate::executor::GraphExecutor;
use async_trait::async_trait;
use rungraph_checkpoint::{MemoryStore, State};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result of running a step
pub type StepResult = Result<StepOutput, BoxError>;

/// Boxed future returned by closure steps
pub type StepFuture = Pin<Box<dyn Future<Output = StepResult> + Send>>;

/// Routing decision returned by a step
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Route {
    /// Schedule the named steps for the next superstep
    Goto(Vec<String>),

    /// Follow the step's static edges; stop if it has none
    #[default]
    Continue,

    /// Pause the run and hand `payload` to the caller
    Pause(Value),

    /// End this branch of the run
    Stop,
}

/// State delta plus routing decision
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutput {
    pub delta: State,
    pub route: Route,
}

impl StepOutput {
    pub fn goto<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            delta: State::new(),
            route: Route::Goto(steps.into_iter().map(Into::into).collect()),
        }
    }

    /// Follow static edges
    pub fn next() -> Self {
        Self::default()
    }

    pub fn stop() -> Self {
        Self {
            delta: State::new(),
            route: Route::Stop,
        }
    }

    pub fn pause(payload: Value) -> Self {
        Self {
            delta: State::new(),
            route: Route::Pause(payload),
        }
    }

    /// Write `value` to `channel`
    pub fn set(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.delta.insert(channel.into(), value);
        self
    }

    /// Write every channel of `delta`
    pub fn with_delta(mut self, delta: State) -> Self {
        self.delta.extend(delta);
        self
    }
}

/// Everything a running step can see
#[derive(Clone)]
pub struct StepContext {
    thread_id: String,
    step: String,
    superstep: usize,
    state: Arc<State>,
    channels: Arc<Channels>,
    resume: Option<Value>,
    sink: EventSink,
    executor: GraphExecutor,
}

impl StepContext {
    pub(crate) fn new(
        thread_id: impl Into<String>,
        step: impl Into<String>,
        superstep: usize,
        state: Arc<State>,
        channels: Arc<Channels>,
        resume: Option<Value>,
        sink: EventSink,
        executor: GraphExecutor,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            step: step.into(),
            superstep,
            state,
            channels,
            resume,
            sink,
            executor,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Index of the current superstep within the run
    pub fn superstep(&self) -> usize {
        self.superstep
    }

    /// State as of the start of the superstep
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.state.get(channel)
    }

    /// How the running graph merges writes to `channel`
    pub fn policy(&self, channel: &str) -> MergePolicy {
        self.channels.policy(channel)
    }

    /// Value supplied by the caller when this step is re-entered after a pause
    pub fn resume_value(&self) -> Option<&Value> {
        self.resume.as_ref()
    }

    pub fn is_resuming(&self) -> bool {
        self.resume.is_some()
    }

    pub fn emit_token(&self, text: impl Into<String>) {
        self.sink.emit(Event::Token {
            step: self.step.clone(),
            text: text.into(),
        });
    }

    pub fn emit_custom(&self, payload: Value) {
        self.sink.emit(Event::Custom {
            step: self.step.clone(),
            payload,
        });
    }

    /// Long-term memory store, if the coordinator was given one
    pub fn store(&self) -> Option<Arc<dyn MemoryStore>> {
        self.executor.store().cloned()
    }

    pub(crate) fn channels(&self) -> &Channels {
        &self.channels
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub(crate) fn executor(&self) -> &GraphExecutor {
        &self.executor
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("thread_id", &self.thread_id)
            .field("step", &self.step)
            .field("superstep", &self.superstep)
            .field("resuming", &self.resume.is_some())
            .finish()
    }
}

/// A unit of work in a graph
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, ctx: StepContext) -> StepResult;
}

/// Adapter turning a closure into a [`Step`]
pub(crate) struct FnStep<F>(pub(crate) F);

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(StepContext) -> StepFuture + Send + Sync,
{
    async fn run(&self, ctx: StepContext) -> StepResult {
        (self.0)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_builders() {
        let out = StepOutput::goto(["a", "b"]).set("x", json!(1));
        assert_eq!(out.route, Route::Goto(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(out.delta["x"], json!(1));

        assert_eq!(StepOutput::next().route, Route::Continue);
        assert_eq!(StepOutput::stop().route, Route::Stop);
        assert_eq!(
            StepOutput::pause(json!({"question": "confirm?"})).route,
            Route::Pause(json!({"question": "confirm?"}))
        );

        let mut delta = State::new();
        delta.insert("y".to_string(), json!(2));
        let out = StepOutput::stop().set("x", json!(1)).with_delta(delta);
        assert_eq!(out.delta.len(), 2);
    }
}
