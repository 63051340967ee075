//! Agent composition: delegation and supervisors
//!
//! Any compiled graph can run as a single step of another graph through
//! [`DelegateStep`]. The child runs on its own checkpoint thread
//! (`{parent_thread}/{step}`) in the same store, with the same superstep cap,
//! and its terminal state is folded back into the parent as the step's delta.
//!
//! ```text
//! parent thread "t1"                 child thread "t1/research"
//! ┌────────────┐   seed (inputs)    ┌─────────────────────────┐
//! │ supervisor │ ─────────────────► │ search ─► summarize     │
//! │     ▲      │                    └───────────┬─────────────┘
//! │     │      │ ◄──────────────────────────────┘
//! │  research  │   delta (outputs, new append items only)
//! └────────────┘
//! ```
//!
//! # Pause and failure
//!
//! A child that pauses pauses the delegating step with the child's payload.
//! Resuming the parent re-enters the delegating step, which resumes the child
//! from its own latest checkpoint. A child that fails fails the delegating
//! step.
//!
//! # Supervisors
//!
//! [`Supervisor`] compiles to a graph with a `supervisor` step plus one
//! delegating step per member, each routing back to `supervisor`. The router
//! picks the next member or finishes; the choice is recorded in the
//! `next_agent` channel. A member can itself be a supervisor, giving
//! hierarchical teams of any depth.
//!
//! ```rust,no_run
//! use rungraph_core::{Agent, StepOutput, StepRegistry, Supervisor, SupervisorDecision};
//! use serde_json::json;
//!
//! # fn main() -> rungraph_core::Result<()> {
//! let mut writer = StepRegistry::builder("writer");
//! writer.add_step("draft", |_ctx| {
//!     Box::pin(async move { Ok(StepOutput::stop().set("draft", json!("..."))) })
//! });
//!
//! let team = Supervisor::new("team", |state| {
//!     Box::pin(async move {
//!         Ok(if state.contains_key("draft") {
//!             SupervisorDecision::Finish
//!         } else {
//!             SupervisorDecision::delegate("writer")
//!         })
//!     })
//! })
//! .with_member(Agent::Graph(writer.compile()?));
//!
//! let registry = Agent::Supervisor(team).compile()?;
//! assert_eq!(registry.entry(), "supervisor");
//! # Ok(())
//! # }
//! ```

use crate::channel::{Channels, MergePolicy};
use crate::error::{BoxError, GraphError, Result};
use crate::executor::RunInput;
use crate::registry::StepRegistry;
use crate::step::{Step, StepContext, StepOutput, StepResult};
use async_trait::async_trait;
use rungraph_checkpoint::{Checkpoint, FailureKind, State};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Name of the routing step in a compiled supervisor
pub const SUPERVISOR_STEP: &str = "supervisor";

/// Channel recording the supervisor's latest choice (`null` once finished)
pub const NEXT_AGENT_CHANNEL: &str = "next_agent";

/// An agent: either a plain graph or a supervisor over other agents
pub enum Agent {
    Graph(StepRegistry),
    Supervisor(Supervisor),
}

impl Agent {
    pub fn name(&self) -> &str {
        match self {
            Agent::Graph(registry) => registry.name(),
            Agent::Supervisor(supervisor) => supervisor.name(),
        }
    }

    /// Compile to the registry the executor runs
    pub fn compile(self) -> Result<StepRegistry> {
        match self {
            Agent::Graph(registry) => Ok(registry),
            Agent::Supervisor(supervisor) => supervisor.compile(),
        }
    }
}

impl From<StepRegistry> for Agent {
    fn from(registry: StepRegistry) -> Self {
        Agent::Graph(registry)
    }
}

impl From<Supervisor> for Agent {
    fn from(supervisor: Supervisor) -> Self {
        Agent::Supervisor(supervisor)
    }
}

/// Step that runs another graph as a sub-run
pub struct DelegateStep {
    registry: Arc<StepRegistry>,
    input_channels: Option<Vec<String>>,
    output_channels: Option<Vec<String>>,
    private_channels: Vec<String>,
}

impl DelegateStep {
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            input_channels: None,
            output_channels: None,
            private_channels: Vec::new(),
        }
    }

    /// Restrict the parent channels the child starts with (default: all)
    pub fn with_input_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the child channels folded back into the parent (default: all)
    pub fn with_output_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Channels that are neither passed down nor folded back
    pub fn with_private_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.private_channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    fn is_private(&self, channel: &str) -> bool {
        self.private_channels.iter().any(|c| c == channel)
    }

    /// Child's starting state
    fn seed(&self, parent: &State) -> State {
        parent
            .iter()
            .filter(|(channel, _)| !self.is_private(channel))
            .filter(|(channel, _)| match &self.input_channels {
                Some(inputs) => inputs.iter().any(|c| c == *channel),
                None => true,
            })
            .map(|(channel, value)| (channel.clone(), value.clone()))
            .collect()
    }

    /// Parent delta for a finished child run that started from `seed`.
    /// Append trimming follows the parent's policies, which are what merge
    /// the delta.
    fn output_delta(&self, parent: &Channels, seed: &State, mut finished: State) -> State {
        let channels: Vec<String> = match &self.output_channels {
            Some(outputs) => outputs.clone(),
            None => finished.keys().cloned().collect(),
        };

        let mut delta = State::new();
        for channel in channels {
            if self.is_private(&channel) {
                continue;
            }
            let Some(value) = finished.remove(&channel) else {
                continue;
            };
            let before = seed.get(&channel);

            match (parent.policy(&channel), value) {
                (MergePolicy::Append, Value::Array(items)) => {
                    let known = before.and_then(Value::as_array).map_or(0, Vec::len);
                    let appended: Vec<Value> = items.into_iter().skip(known).collect();
                    if !appended.is_empty() {
                        delta.insert(channel, Value::Array(appended));
                    }
                }
                (_, value) => {
                    if before != Some(&value) {
                        delta.insert(channel, value);
                    }
                }
            }
        }
        delta
    }
}

#[async_trait]
impl Step for DelegateStep {
    async fn run(&self, ctx: StepContext) -> StepResult {
        let executor = ctx.executor();
        let child_thread = format!("{}/{}", ctx.thread_id(), ctx.step());
        let sink = ctx.sink().scoped(ctx.step());
        let seed = self.seed(ctx.state());

        let finished = match ctx.resume_value() {
            Some(value) => {
                let paused = executor
                    .checkpointer()
                    .latest(&child_thread)
                    .await?
                    .filter(Checkpoint::is_paused)
                    .ok_or_else(|| {
                        format!("sub-agent '{}' has no paused run to resume", self.registry.name())
                    })?;
                debug!(child_thread = %child_thread, "Resuming sub-agent");
                executor
                    .continue_from(&self.registry, paused, Some(value.clone()), &sink)
                    .await?
            }
            None => {
                let latest = executor.checkpointer().latest(&child_thread).await?;
                debug!(
                    child_thread = %child_thread,
                    agent = %self.registry.name(),
                    "Delegating to sub-agent"
                );
                let input = RunInput::Seed(seed.clone());
                executor
                    .run_from(&self.registry, &child_thread, latest, input, &sink)
                    .await?
            }
        };

        if let Some(interrupt) = &finished.pending_interrupt {
            return Ok(StepOutput::pause(interrupt.payload.clone()));
        }
        if let Some(failure) = &finished.error {
            if failure.kind == FailureKind::RunawayExecution {
                let limit = executor.config().execution.max_supersteps;
                return Err(Box::new(GraphError::RunawayExecution { limit }));
            }
            return Err(format!(
                "sub-agent '{}' failed: {}",
                self.registry.name(),
                failure.message
            )
            .into());
        }

        let delta = self.output_delta(ctx.channels(), &seed, finished.state);
        Ok(StepOutput::next().with_delta(delta))
    }
}

/// Boxed future returned by supervisor routers
pub type RouterFuture =
    Pin<Box<dyn Future<Output = std::result::Result<SupervisorDecision, BoxError>> + Send>>;

type RouterFn = dyn Fn(State) -> RouterFuture + Send + Sync;

/// What a supervisor does next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorDecision {
    /// Hand the run to the named member
    Delegate(String),
    Finish,
}

impl SupervisorDecision {
    pub fn delegate(member: impl Into<String>) -> Self {
        SupervisorDecision::Delegate(member.into())
    }
}

/// Router choosing among member agents each turn
pub struct Supervisor {
    name: String,
    router: Arc<RouterFn>,
    members: Vec<Agent>,
}

impl Supervisor {
    /// `router` sees the current state and returns the next member or
    /// [`SupervisorDecision::Finish`].
    pub fn new<F>(name: impl Into<String>, router: F) -> Self
    where
        F: Fn(State) -> RouterFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            router: Arc::new(router),
            members: Vec::new(),
        }
    }

    /// Add a member, addressed by its agent name
    pub fn with_member(mut self, agent: impl Into<Agent>) -> Self {
        self.members.push(agent.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(Agent::name).collect()
    }

    /// Compile to a registry: `supervisor` plus one delegating step per member.
    ///
    /// Channel policies declared by members are carried over so their output
    /// merges the same way in the supervisor's state; members declaring one
    /// channel with different policies are rejected.
    pub fn compile(self) -> Result<StepRegistry> {
        if self.members.is_empty() {
            return Err(GraphError::Validation(format!(
                "supervisor '{}' has no members",
                self.name
            )));
        }

        let names: Vec<String> = self.members.iter().map(|m| m.name().to_string()).collect();
        let mut builder = StepRegistry::builder(self.name.clone());
        let mut policies: HashMap<String, MergePolicy> = HashMap::new();

        for member in self.members {
            let name = member.name().to_string();
            if name == SUPERVISOR_STEP {
                return Err(GraphError::Validation(format!(
                    "supervisor '{}' has a member named '{}'",
                    self.name, SUPERVISOR_STEP
                )));
            }

            let registry = member.compile()?;
            for (channel, policy) in registry.channels().declared() {
                if let Some(existing) = policies.insert(channel.to_string(), policy) {
                    if existing != policy {
                        return Err(GraphError::Validation(format!(
                            "members of '{}' disagree on the merge policy of channel '{}'",
                            self.name, channel
                        )));
                    }
                }
            }

            let delegate = DelegateStep::new(registry).with_private_channels([NEXT_AGENT_CHANNEL]);
            builder
                .add_step_with(name.clone(), delegate)
                .add_edge(name, SUPERVISOR_STEP);
        }

        for (channel, policy) in policies {
            builder.add_channel(channel, policy);
        }
        builder
            .add_channel(NEXT_AGENT_CHANNEL, MergePolicy::Replace)
            .add_step_with(
                SUPERVISOR_STEP,
                RouterStep {
                    router: self.router,
                    members: names,
                },
            )
            .set_entry(SUPERVISOR_STEP);

        builder.compile()
    }
}

struct RouterStep {
    router: Arc<RouterFn>,
    members: Vec<String>,
}

#[async_trait]
impl Step for RouterStep {
    async fn run(&self, ctx: StepContext) -> StepResult {
        let decision = (self.router)(ctx.state().clone()).await?;
        debug!(thread_id = %ctx.thread_id(), decision = ?decision, "Supervisor routed");

        match decision {
            SupervisorDecision::Delegate(member) => {
                if !self.members.contains(&member) {
                    return Err(format!("router chose unknown member '{}'", member).into());
                }
                Ok(StepOutput::goto([member.clone()])
                    .set(NEXT_AGENT_CHANNEL, Value::String(member)))
            }
            SupervisorDecision::Finish => {
                Ok(StepOutput::stop().set(NEXT_AGENT_CHANNEL, Value::Null))
            }
        }
    }
}
