//! Checkpoint data structures
//!
//! A [`Checkpoint`] is one immutable entry in a thread's append-only log. It
//! records the channel state after a superstep, which steps are scheduled to
//! run next, and whether execution is waiting on an external answer.
//!
//! Status is never stored. It is derived from the other fields:
//!
//! | `pending_interrupt` | `next_steps` | `error` | status |
//! |---|---|---|---|
//! | set | any | - | [`Paused`](CheckpointStatus::Paused) |
//! | unset | non-empty | - | [`Running`](CheckpointStatus::Running) |
//! | unset | empty | unset | [`Completed`](CheckpointStatus::Completed) |
//! | unset | empty | set | [`Failed`](CheckpointStatus::Failed) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier of a single checkpoint
pub type CheckpointId = String;

/// Channel name to value mapping carried by every checkpoint
pub type State = serde_json::Map<String, Value>;

/// Where a checkpoint came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// First superstep of a run started from fresh input
    Input,
    /// Subsequent superstep of a run
    Loop,
    /// First superstep after resuming an interrupt
    Resume,
    /// Terminal record written after a failed superstep
    Failure,
}

/// Additional information about a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Superstep index within the run that produced this checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superstep: Option<usize>,

    /// Steps executed in that superstep, in scheduling order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_superstep(mut self, superstep: usize) -> Self {
        self.superstep = Some(superstep);
        self
    }

    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// An interrupt awaiting external resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInterrupt {
    pub id: String,

    /// Step that paused and will be re-entered on resume
    pub step: String,

    /// Payload handed to the caller (e.g. a question for a human)
    pub payload: Value,
}

impl PendingInterrupt {
    pub fn new(step: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step: step.into(),
            payload,
        }
    }
}

/// Why a run ended in a terminal-failed checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StepExecution,
    RunawayExecution,
}

/// Failure details recorded on a terminal-failed checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointFailure {
    pub kind: FailureKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    pub message: String,
}

/// Derived lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

/// Immutable snapshot of a thread's execution state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Format version
    pub v: i32,

    pub id: CheckpointId,

    pub thread_id: String,

    /// Position in the thread's log; the first checkpoint of a thread is 0
    pub sequence: u64,

    pub created_at: DateTime<Utc>,

    pub state: State,

    /// Steps scheduled for the next superstep; empty means terminal
    #[serde(default)]
    pub next_steps: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<PendingInterrupt>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CheckpointFailure>,

    #[serde(default)]
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(
        thread_id: impl Into<String>,
        sequence: u64,
        state: State,
        next_steps: Vec<String>,
    ) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            sequence,
            created_at: Utc::now(),
            state,
            next_steps,
            pending_interrupt: None,
            error: None,
            metadata: CheckpointMetadata::default(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: PendingInterrupt) -> Self {
        self.pending_interrupt = Some(interrupt);
        self
    }

    /// Marks the checkpoint terminal-failed. Clears any scheduled steps.
    pub fn with_failure(mut self, failure: CheckpointFailure) -> Self {
        self.next_steps.clear();
        self.pending_interrupt = None;
        self.error = Some(failure);
        self
    }

    pub fn with_metadata(mut self, metadata: CheckpointMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn status(&self) -> CheckpointStatus {
        if self.pending_interrupt.is_some() {
            CheckpointStatus::Paused
        } else if !self.next_steps.is_empty() {
            CheckpointStatus::Running
        } else if self.error.is_some() {
            CheckpointStatus::Failed
        } else {
            CheckpointStatus::Completed
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status() == CheckpointStatus::Paused
    }

    /// `true` for completed and failed checkpoints
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status(),
            CheckpointStatus::Completed | CheckpointStatus::Failed
        )
    }

    pub fn is_failed(&self) -> bool {
        self.status() == CheckpointStatus::Failed
    }
}

/// Summary of a thread held by a checkpoint saver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadInfo {
    pub thread_id: String,

    pub created_at: DateTime<Utc>,

    pub checkpoint_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_sequence: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> State {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_status_is_derived() {
        let running = Checkpoint::new("t1", 0, State::new(), vec!["respond".to_string()]);
        assert_eq!(running.status(), CheckpointStatus::Running);
        assert!(!running.is_terminal());

        let completed = Checkpoint::new("t1", 1, State::new(), vec![]);
        assert_eq!(completed.status(), CheckpointStatus::Completed);
        assert!(completed.is_terminal());

        let paused = Checkpoint::new("t1", 2, State::new(), vec!["ask_human".to_string()])
            .with_interrupt(PendingInterrupt::new("ask_human", json!({"question": "confirm?"})));
        assert!(paused.is_paused());
        assert!(!paused.is_terminal());
    }

    #[test]
    fn test_failure_clears_schedule() {
        let failed = Checkpoint::new("t1", 3, state(json!({"a": 1})), vec!["next".to_string()])
            .with_failure(CheckpointFailure {
                kind: FailureKind::StepExecution,
                step: Some("next".to_string()),
                message: "boom".to_string(),
            });

        assert!(failed.next_steps.is_empty());
        assert!(failed.is_failed());
        assert!(failed.is_terminal());
        assert_eq!(failed.state.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_superstep(0)
            .with_steps(vec!["greet".to_string()])
            .with_extra("origin", json!("cli"));

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["source"], json!("input"));
        assert_eq!(value["superstep"], json!(0));
        assert_eq!(value["steps"], json!(["greet"]));
        assert_eq!(value["origin"], json!("cli"));
    }

    #[test]
    fn test_failure_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(FailureKind::RunawayExecution).unwrap(),
            json!("runaway_execution")
        );
    }
}
