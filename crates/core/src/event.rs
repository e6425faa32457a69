//! Event types for the deterministic state machine.

use crate::RequestId;
use dolev_messages::BroadcastGossip;
use dolev_types::{NodeId, Payload};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Timer events: scheduled by the node itself.
    Timer = 0,

    /// Network events: external inputs from other nodes.
    Network = 1,

    /// Client events: external inputs from users.
    Client = 2,
}

/// All possible events a node can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// Periodic inactivity check fired.
    LivenessTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// Received a broadcast relay from a direct peer.
    ///
    /// `from` is supplied by the transport (authenticated link), never by
    /// the message itself.
    BroadcastReceived {
        from: NodeId,
        gossip: BroadcastGossip,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Client Requests (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// Originate a new broadcast instance.
    SubmitBroadcast {
        payload: Payload,
        request_id: RequestId,
    },
}

impl Event {
    /// Get the priority of this event.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::LivenessTimer => EventPriority::Timer,
            Event::BroadcastReceived { .. } => EventPriority::Network,
            Event::SubmitBroadcast { .. } => EventPriority::Client,
        }
    }

    /// Check if this is a network event (from another node).
    pub fn is_network(&self) -> bool {
        self.priority() == EventPriority::Network
    }

    /// Check if this is a client event (from a user).
    pub fn is_client(&self) -> bool {
        self.priority() == EventPriority::Client
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::LivenessTimer => "LivenessTimer",
            Event::BroadcastReceived { .. } => "BroadcastReceived",
            Event::SubmitBroadcast { .. } => "SubmitBroadcast",
        }
    }
}
