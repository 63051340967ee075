//! State channels and their merge policies
//!
//! Graph state is a map from channel name to JSON value. Each channel declares
//! at graph-definition time how a step's write is merged into it:
//!
//! - [`MergePolicy::Replace`] - the write becomes the new value (default for
//!   undeclared channels)
//! - [`MergePolicy::Append`] - the write is appended; arrays are concatenated,
//!   scalars pushed
//!
//! Within one superstep, fanned-out steps must write disjoint replace
//! channels. Two writers to one replace channel is reported as
//! [`ChannelError::ConflictingWrites`]. Append channels accept any number of
//! writers and concatenate in scheduling order.

use rungraph_checkpoint::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Channel '{channel}' is append-only but holds a non-array value")]
    NotAppendable { channel: String },

    #[error("Channel '{channel}' was written by several steps in one superstep: {steps:?}")]
    ConflictingWrites { channel: String, steps: Vec<String> },
}

/// How writes to a channel are combined with its current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    #[default]
    Replace,
    Append,
}

impl MergePolicy {
    pub fn merge(
        self,
        channel: &str,
        current: Option<&Value>,
        update: Value,
    ) -> Result<Value, ChannelError> {
        match self {
            MergePolicy::Replace => Ok(update),
            MergePolicy::Append => {
                let mut items = match current {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.clone(),
                    Some(_) => {
                        return Err(ChannelError::NotAppendable {
                            channel: channel.to_string(),
                        })
                    }
                };
                match update {
                    Value::Array(new_items) => items.extend(new_items),
                    single => items.push(single),
                }
                Ok(Value::Array(items))
            }
        }
    }
}

/// Channel declarations of one graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Channels {
    policies: HashMap<String, MergePolicy>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, policy: MergePolicy) {
        self.policies.insert(name.into(), policy);
    }

    pub fn policy(&self, name: &str) -> MergePolicy {
        self.policies.get(name).copied().unwrap_or_default()
    }

    pub fn declared(&self) -> impl Iterator<Item = (&str, MergePolicy)> {
        self.policies.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Merge a single delta into `state`.
    pub fn apply(&self, state: &mut State, delta: State) -> Result<(), ChannelError> {
        for (channel, update) in delta {
            let merged = self.policy(&channel).merge(&channel, state.get(&channel), update)?;
            state.insert(channel, merged);
        }
        Ok(())
    }

    /// Merge the deltas of one superstep, given as `(step, delta)` in
    /// scheduling order.
    ///
    /// On failure returns the step whose write could not be applied. `state`
    /// may be partially updated then, so callers merge into a scratch copy.
    pub fn apply_superstep(
        &self,
        state: &mut State,
        writes: Vec<(String, State)>,
    ) -> Result<(), (String, ChannelError)> {
        let mut writers: HashMap<&str, Vec<&str>> = HashMap::new();
        for (step, delta) in &writes {
            for channel in delta.keys() {
                if self.policy(channel) == MergePolicy::Replace {
                    let steps = writers.entry(channel.as_str()).or_default();
                    steps.push(step.as_str());
                    if steps.len() > 1 {
                        return Err((
                            step.clone(),
                            ChannelError::ConflictingWrites {
                                channel: channel.clone(),
                                steps: steps.iter().map(|s| s.to_string()).collect(),
                            },
                        ));
                    }
                }
            }
        }

        for (step, delta) in writes {
            self.apply(state, delta).map_err(|e| (step, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(value: Value) -> State {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_replace_and_append() {
        let mut channels = Channels::new();
        channels.declare("messages", MergePolicy::Append);

        let mut state = State::new();
        channels
            .apply(&mut state, delta(json!({"messages": ["hi"], "status": "start"})))
            .unwrap();
        channels
            .apply(&mut state, delta(json!({"messages": "hello", "status": "done"})))
            .unwrap();
        channels
            .apply(&mut state, delta(json!({"messages": ["a", "b"]})))
            .unwrap();

        assert_eq!(state["messages"], json!(["hi", "hello", "a", "b"]));
        assert_eq!(state["status"], json!("done"));
    }

    #[test]
    fn test_append_to_scalar_fails() {
        let mut channels = Channels::new();
        channels.declare("log", MergePolicy::Append);

        let mut state = delta(json!({"log": "oops"}));
        let err = channels
            .apply(&mut state, delta(json!({"log": "x"})))
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotAppendable { .. }));
    }

    #[test]
    fn test_superstep_conflicting_replace_writes() {
        let channels = Channels::new();
        let mut state = State::new();

        let err = channels
            .apply_superstep(
                &mut state,
                vec![
                    ("a".to_string(), delta(json!({"answer": 1}))),
                    ("b".to_string(), delta(json!({"answer": 2}))),
                ],
            )
            .unwrap_err();

        assert_eq!(err.0, "b");
        assert_eq!(
            err.1,
            ChannelError::ConflictingWrites {
                channel: "answer".to_string(),
                steps: vec!["a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn test_superstep_append_from_many_writers() {
        let mut channels = Channels::new();
        channels.declare("results", MergePolicy::Append);
        let mut state = State::new();

        channels
            .apply_superstep(
                &mut state,
                vec![
                    ("a".to_string(), delta(json!({"results": ["from a"], "a_done": true}))),
                    ("b".to_string(), delta(json!({"results": ["from b"], "b_done": true}))),
                ],
            )
            .unwrap();

        assert_eq!(state["results"], json!(["from a", "from b"]));
        assert_eq!(state["a_done"], json!(true));
        assert_eq!(state["b_done"], json!(true));
    }
}
