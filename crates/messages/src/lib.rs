//! Network messages for the broadcast protocol.
//!
//! Only the message *shape* lives here. Framing and encoding belong to the
//! transport; runners hand these values to the state machine as-is.

pub mod gossip;

// Re-export commonly used types
pub use gossip::{BroadcastGossip, MessageError};

/// A message that travels between nodes.
pub trait NetworkMessage {
    /// Stable identifier for logging and routing.
    fn message_type_id() -> &'static str;
}
