//! Action types for the deterministic state machine.

use crate::{message::OutboundMessage, RequestId, TimerId};
use dolev_types::{MessageId, NodeId, Payload};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions; none of them block the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a message to one direct peer.
    ///
    /// Best effort: the runner may delay (relay jitter), reorder, or lose it.
    SendTo { to: NodeId, message: OutboundMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// A broadcast instance was delivered locally. Emitted at most once per id.
    EmitDelivered { id: MessageId, payload: Payload },

    /// A client broadcast request was accepted under `id`.
    EmitBroadcastAccepted { request_id: RequestId, id: MessageId },

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════
    /// Stop the local event loop after prolonged silence.
    ///
    /// Cooperative: deliveries already decided are kept.
    Terminate { idle_for: Duration },
}

impl Action {
    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::SendTo { .. } => "SendTo",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EmitDelivered { .. } => "EmitDelivered",
            Action::EmitBroadcastAccepted { .. } => "EmitBroadcastAccepted",
            Action::Terminate { .. } => "Terminate",
        }
    }

    /// Check if this action sends a network message.
    pub fn is_send(&self) -> bool {
        matches!(self, Action::SendTo { .. })
    }
}
