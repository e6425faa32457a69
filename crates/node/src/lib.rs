//! Combined node state machine.
//!
//! This crate composes a broadcast behaviour (correct or adversarial) and the
//! liveness monitor into a complete node.

mod config;
mod state;

pub use config::{NodeBehavior, NodeConfig, NodeConfigError, TopologyCheck};
pub use state::{NodeIndex, NodeStateMachine};
