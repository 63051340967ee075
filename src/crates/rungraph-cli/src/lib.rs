//! # rungraph-cli
//!
//! Terminal front end for rungraph: runs the bundled demo agents against the
//! configured checkpoint store, so a run paused by one process can be resumed
//! by the next.

pub mod agents;
pub mod commands;
pub mod logging;

pub use agents::DemoAgent;
pub use commands::{open_checkpointer, parse_value, Session};
