//! Outbound message types for network communication.

use dolev_messages::{BroadcastGossip, NetworkMessage};

/// Outbound network messages.
///
/// These are the messages that a node can send to its peers.
/// The runner handles the actual network I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A relay of a broadcast instance.
    Broadcast(BroadcastGossip),
}

impl OutboundMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Broadcast(_) => BroadcastGossip::message_type_id(),
        }
    }

    /// Borrow the broadcast relay carried by this message.
    pub fn as_broadcast(&self) -> Option<&BroadcastGossip> {
        match self {
            OutboundMessage::Broadcast(gossip) => Some(gossip),
        }
    }
}
