//! Run events and the sink steps emit them through
//!
//! A run produces one ordered sequence of [`Event`]s. The executor emits
//! `step_start`/`step_end` around every step; steps add `token` and `custom`
//! events mid-step; a run that pauses or fails ends with `interrupt` or
//! `error`.
//!
//! Events are serialized with an `event` tag so transports can forward them
//! verbatim:
//!
//! ```json
//! {"event":"token","step":"respond","text":"Hel"}
//! {"event":"step_end","step":"respond","result":{"reply":"Hello"}}
//! ```
//!
//! # Nested runs
//!
//! A delegated sub-run writes into a [scoped](EventSink::scoped) sink, which
//! qualifies step names with the delegation path (`research/search`). Terminal
//! `interrupt`/`error` events of a sub-run are not forwarded: the delegating
//! step surfaces the pause or failure itself.

use crate::error::ErrorKind;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tokio::sync::mpsc;

/// One unit of run output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Partial text produced by a step
    Token { step: String, text: String },

    StepStart { step: String, superstep: usize },

    /// `result` holds the state delta the step returned
    StepEnd {
        step: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    /// Structured payload defined by the step
    Custom { step: String, payload: Value },

    /// The run paused; nothing follows until it is resumed
    Interrupt { step: String, payload: Value },

    /// The run failed; always the last event
    Error {
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<String>,
        message: String,
    },
}

impl Event {
    pub fn step(&self) -> Option<&str> {
        match self {
            Event::Token { step, .. }
            | Event::StepStart { step, .. }
            | Event::StepEnd { step, .. }
            | Event::Custom { step, .. }
            | Event::Interrupt { step, .. } => Some(step),
            Event::Error { step, .. } => step.as_deref(),
        }
    }

    /// `interrupt` and `error` end a stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Interrupt { .. } | Event::Error { .. })
    }

    fn qualify(mut self, prefix: &str) -> Self {
        let step = match &mut self {
            Event::Token { step, .. }
            | Event::StepStart { step, .. }
            | Event::StepEnd { step, .. }
            | Event::Custom { step, .. }
            | Event::Interrupt { step, .. } => Some(step),
            Event::Error { step, .. } => step.as_mut(),
        };
        if let Some(step) = step {
            *step = format!("{}/{}", prefix, step);
        }
        self
    }
}

/// Lazy, single-pass sequence of run events
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Write half of a run's event sequence
///
/// Cheap to clone. Emitting never blocks and never fails; events sent after the
/// consumer went away are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
    prefix: Option<String>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                prefix: None,
            },
            rx,
        )
    }

    /// A sink that drops everything
    pub fn discard() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: Event) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = match &self.prefix {
            Some(prefix) => event.qualify(prefix),
            None => event,
        };
        let _ = tx.send(event);
    }

    /// Sink for a sub-run delegated from `step`
    pub fn scoped(&self, step: &str) -> Self {
        let prefix = match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, step),
            None => step.to_string(),
        };
        Self {
            tx: self.tx.clone(),
            prefix: Some(prefix),
        }
    }

    /// `true` inside a delegated sub-run
    pub fn is_nested(&self) -> bool {
        self.prefix.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = Event::StepEnd {
            step: "respond".to_string(),
            result: Some(json!({"reply": "Hello"})),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "step_end", "step": "respond", "result": {"reply": "Hello"}})
        );

        let error = Event::Error {
            kind: ErrorKind::RunawayExecution,
            step: None,
            message: "too many supersteps".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"event": "error", "kind": "runaway_execution", "message": "too many supersteps"})
        );
    }

    #[tokio::test]
    async fn test_scoped_sink_qualifies_step_names() {
        let (sink, mut rx) = EventSink::channel();
        let nested = sink.scoped("research").scoped("search");

        sink.emit(Event::StepStart {
            step: "supervisor".to_string(),
            superstep: 0,
        });
        nested.emit(Event::Token {
            step: "fetch".to_string(),
            text: "abc".to_string(),
        });

        assert_eq!(rx.recv().await.unwrap().step(), Some("supervisor"));
        assert_eq!(
            rx.recv().await.unwrap().step(),
            Some("research/search/fetch")
        );
        assert!(!sink.is_nested());
        assert!(nested.is_nested());
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(Event::Custom {
            step: "s".to_string(),
            payload: json!(1),
        });
        EventSink::discard().emit(Event::Custom {
            step: "s".to_string(),
            payload: json!(2),
        });
    }
}
