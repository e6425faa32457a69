//! Core types for Dolev reliable broadcast.
//!
//! This crate provides the foundational types for the node architecture:
//!
//! - [`Event`]: All possible inputs to the state machine
//! - [`Action`]: All possible outputs from the state machine
//! - [`EventPriority`]: Ordering priority for events at the same timestamp
//! - [`StateMachine`]: The trait that all state machines implement
//!
//! # Architecture
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + event = same actions
//! - **Pure-ish**: Mutates self, but performs no I/O
//!
//! All I/O is handled by the runner (simulation or production) which:
//! 1. Delivers events to the state machine
//! 2. Executes the returned actions (sends, timers, notifications)

mod action;
mod event;
mod message;
mod request;
mod traits;

pub use action::Action;
pub use event::{Event, EventPriority};
pub use message::OutboundMessage;
pub use request::RequestId;
pub use traits::StateMachine;

/// Type alias for timer identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Periodic inactivity check.
    Liveness,
}
