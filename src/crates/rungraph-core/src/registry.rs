//! Step registry: the static definition of one agent graph
//!
//! A [`StepRegistry`] maps step names to step implementations and carries the
//! rest of the graph definition: channel merge policies, the entry step and
//! optional static edges. It holds no run state, so one registry serves any
//! number of concurrent runs.
//!
//! Dynamic routing is returned by value from each step ([`Route`]); static
//! edges are only consulted when a step returns [`Route::Continue`].
//!
//! # Example
//!
//! ```rust,no_run
//! use rungraph_core::{MergePolicy, StepOutput, StepRegistry};
//! use serde_json::json;
//!
//! # fn main() -> rungraph_core::Result<()> {
//! let mut builder = StepRegistry::builder("chat");
//! builder
//!     .add_channel("messages", MergePolicy::Append)
//!     .add_step("greet", |_ctx| {
//!         Box::pin(async move { Ok(StepOutput::next().set("messages", json!(["hello"]))) })
//!     })
//!     .add_step("respond", |_ctx| {
//!         Box::pin(async move { Ok(StepOutput::stop().set("messages", json!(["bye"]))) })
//!     })
//!     .add_edge("greet", "respond")
//!     .set_entry("greet");
//!
//! let registry = builder.compile()?;
//! assert_eq!(registry.edges_from("greet"), ["respond".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! [`Route`]: crate::Route
//! [`Route::Continue`]: crate::Route::Continue

use crate::channel::{Channels, MergePolicy};
use crate::error::{GraphError, Result};
use crate::step::{FnStep, Step, StepContext, StepFuture};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Compiled, immutable graph definition
#[derive(Clone)]
pub struct StepRegistry {
    name: String,
    steps: HashMap<String, Arc<dyn Step>>,
    order: Vec<String>,
    channels: Channels,
    edges: HashMap<String, Vec<String>>,
    entry: String,
    input_channel: Option<String>,
}

impl StepRegistry {
    pub fn builder(name: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Step names in registration order
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    pub fn edges_from(&self, step: &str) -> &[String] {
        self.edges.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Channel overriding the configured default for non-object run input
    pub fn input_channel(&self) -> Option<&str> {
        self.input_channel.as_deref()
    }

    /// Serializable description of the graph structure
    pub fn describe(&self) -> GraphDescription {
        let mut edges = Vec::new();
        for from in &self.order {
            for to in self.edges_from(from) {
                edges.push(EdgeDescription {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }

        GraphDescription {
            name: self.name.clone(),
            entry: self.entry.clone(),
            steps: self.order.clone(),
            channels: self
                .channels
                .declared()
                .map(|(name, policy)| (name.to_string(), policy))
                .collect(),
            edges,
            input_channel: self.input_channel.clone(),
        }
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("steps", &self.order)
            .field("edges", &self.edges)
            .finish()
    }
}

/// Structure of a [`StepRegistry`], for introspection and tooling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub name: String,
    pub entry: String,
    pub steps: Vec<String>,
    pub channels: BTreeMap<String, MergePolicy>,
    pub edges: Vec<EdgeDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub from: String,
    pub to: String,
}

/// Builder for [`StepRegistry`]
pub struct RegistryBuilder {
    name: String,
    steps: Vec<(String, Arc<dyn Step>)>,
    channels: Channels,
    edges: Vec<(String, String)>,
    entry: Option<String>,
    input_channel: Option<String>,
}

impl RegistryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            channels: Channels::new(),
            edges: Vec::new(),
            entry: None,
            input_channel: None,
        }
    }

    /// Adds a closure step
    ///
    /// The closure receives the step's [`StepContext`] and returns a boxed
    /// future, so bodies are written as `Box::pin(async move { ... })`.
    pub fn add_step<F>(&mut self, name: impl Into<String>, step: F) -> &mut Self
    where
        F: Fn(StepContext) -> StepFuture + Send + Sync + 'static,
    {
        self.steps.push((name.into(), Arc::new(FnStep(step))));
        self
    }

    /// Adds a step implemented as its own type
    pub fn add_step_with(
        &mut self,
        name: impl Into<String>,
        step: impl Step + 'static,
    ) -> &mut Self {
        self.steps.push((name.into(), Arc::new(step)));
        self
    }

    pub fn add_channel(&mut self, name: impl Into<String>, policy: MergePolicy) -> &mut Self {
        self.channels.declare(name, policy);
        self
    }

    /// Static edge followed when `from` returns `Route::Continue`
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Entry step of new runs; defaults to the first step added
    pub fn set_entry(&mut self, step: impl Into<String>) -> &mut Self {
        self.entry = Some(step.into());
        self
    }

    pub fn set_input_channel(&mut self, channel: impl Into<String>) -> &mut Self {
        self.input_channel = Some(channel.into());
        self
    }

    /// Validates the definition and freezes it
    ///
    /// # Errors
    ///
    /// [`GraphError::Validation`] if the graph has no steps, a step name is
    /// empty, repeated or contains `/` (reserved for delegation paths), or the
    /// entry or an edge names an unknown step.
    pub fn compile(self) -> Result<StepRegistry> {
        if self.steps.is_empty() {
            return Err(GraphError::Validation(format!(
                "graph '{}' has no steps",
                self.name
            )));
        }

        let mut steps = HashMap::with_capacity(self.steps.len());
        let mut order = Vec::with_capacity(self.steps.len());
        for (name, step) in self.steps {
            if name.is_empty() || name.contains('/') {
                return Err(GraphError::Validation(format!(
                    "invalid step name '{}'",
                    name
                )));
            }
            if steps.insert(name.clone(), step).is_some() {
                return Err(GraphError::Validation(format!(
                    "step '{}' is registered twice",
                    name
                )));
            }
            order.push(name);
        }

        let entry = match self.entry {
            Some(entry) => entry,
            None => order[0].clone(),
        };
        if !steps.contains_key(&entry) {
            return Err(GraphError::Validation(format!(
                "entry step '{}' does not exist",
                entry
            )));
        }

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut seen = HashSet::new();
        for (from, to) in self.edges {
            for endpoint in [&from, &to] {
                if !steps.contains_key(endpoint) {
                    return Err(GraphError::Validation(format!(
                        "edge {} -> {} references unknown step '{}'",
                        from, to, endpoint
                    )));
                }
            }
            if seen.insert((from.clone(), to.clone())) {
                edges.entry(from).or_default().push(to);
            }
        }

        Ok(StepRegistry {
            name: self.name,
            steps,
            order,
            channels: self.channels,
            edges,
            entry,
            input_channel: self.input_channel,
        })
    }
}
