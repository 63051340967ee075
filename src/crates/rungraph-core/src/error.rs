//! Error types for graph execution
//!
//! The taxonomy is split by who can act on a failure:
//!
//! | Variant | Raised when | State effect |
//! |---|---|---|
//! | [`GraphError::Usage`] | the thread's state forbids the call | none, rejected |
//! | [`GraphError::StepExecution`] | a step, its routing or merge failed | failed checkpoint |
//! | [`GraphError::RunawayExecution`] | superstep cap exceeded | failed checkpoint |
//! | [`GraphError::Persistence`] | checkpoint store failed | nothing written |
//!
//! Nothing is retried inside the engine.

use rungraph_checkpoint::{CheckpointError, FailureKind, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type returned by step functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Caller mistakes, detected before any state is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("A run is already in progress for thread '{thread_id}'")]
    RunInProgress { thread_id: String },

    #[error("Thread '{thread_id}' has no pending interrupt to resume")]
    NoPendingInterrupt { thread_id: String },

    #[error("Thread '{thread_id}' is paused at step '{step}'; resume it instead")]
    PendingInterrupt { thread_id: String, step: String },

    #[error("A resume value was supplied but no interrupt is pending")]
    UnexpectedResumeValue,

    #[error("Step '{step}' is paused and requires a resume value")]
    MissingResumeValue { step: String },
}

impl UsageError {
    /// Stable identifier for transports mapping errors onto wire codes
    pub fn code(&self) -> &'static str {
        match self {
            UsageError::RunInProgress { .. } => "run_in_progress",
            UsageError::NoPendingInterrupt { .. } => "no_pending_interrupt",
            UsageError::PendingInterrupt { .. } => "pending_interrupt",
            UsageError::UnexpectedResumeValue => "unexpected_resume_value",
            UsageError::MissingResumeValue { .. } => "missing_resume_value",
        }
    }
}

/// Main error type for graph operations
#[derive(Error, Debug)]
pub enum GraphError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("Step '{step}' execution failed: {error}")]
    StepExecution { step: String, error: String },

    #[error("Run exceeded the limit of {limit} supersteps")]
    RunawayExecution { limit: usize },

    #[error("Checkpoint error: {0}")]
    Persistence(#[from] CheckpointError),

    #[error("Memory store error: {0}")]
    Memory(#[from] StoreError),

    #[error("Graph validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    pub fn step_execution(step: impl Into<String>, error: impl ToString) -> Self {
        Self::StepExecution {
            step: step.into(),
            error: error.to_string(),
        }
    }

    pub fn is_usage_error(&self) -> bool {
        matches!(self, GraphError::Usage(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Usage(_) => ErrorKind::Usage,
            GraphError::StepExecution { .. } | GraphError::Memory(_) => ErrorKind::StepExecution,
            GraphError::RunawayExecution { .. } => ErrorKind::RunawayExecution,
            GraphError::Persistence(_) => ErrorKind::Persistence,
            GraphError::Validation(_) | GraphError::Configuration(_) => ErrorKind::Validation,
        }
    }

    /// Failure kind recorded on a terminal-failed checkpoint, if this error
    /// produces one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.kind() {
            ErrorKind::StepExecution => Some(FailureKind::StepExecution),
            ErrorKind::RunawayExecution => Some(FailureKind::RunawayExecution),
            _ => None,
        }
    }
}

/// Error category carried by [`Event::Error`](crate::event::Event::Error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Usage,
    StepExecution,
    RunawayExecution,
    Persistence,
    Validation,
}
