//! BroadcastGossip message.

use crate::NetworkMessage;
use dolev_types::{MessageId, NodeId, Path, Payload, Topology};

/// Structural defects in a received relay.
///
/// A malformed relay is dropped by the receiver and never escalated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The path was rooted somewhere other than the message's originator.
    #[error("path origin {path_origin} does not match message origin {id_origin}")]
    OriginMismatch {
        id_origin: NodeId,
        path_origin: NodeId,
    },

    /// The transport reported a sender outside the membership.
    #[error("sender {0} is not a member")]
    UnknownSender(NodeId),

    /// The sender is a member but not one of our direct neighbours.
    #[error("sender {0} is not a direct peer")]
    NotAPeer(NodeId),

    /// The path lists a node outside the membership.
    #[error("path contains non-member {0}")]
    NonMemberOnPath(NodeId),

    /// The sender claims to have already been on the path it is relaying.
    #[error("sender {0} is already on the relayed path")]
    SenderOnPath(NodeId),

    /// The path already passed through the receiver.
    #[error("receiver {0} is already on the relayed path")]
    ReceiverOnPath(NodeId),
}

/// One relay of a broadcast instance.
///
/// `path` holds the nodes the instance traversed *before* the sender; the
/// receiver appends the sender itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastGossip {
    /// Instance correlation key.
    pub id: MessageId,
    /// Broadcast payload as claimed by the sender.
    pub payload: Payload,
    /// Traversal record up to (not including) the sender.
    pub path: Path,
}

impl BroadcastGossip {
    /// Create a new broadcast gossip message.
    pub fn new(id: MessageId, payload: Payload, path: Path) -> Self {
        Self { id, payload, path }
    }

    /// The originator's first send: root path, straight from the source.
    pub fn originate(id: MessageId, payload: Payload) -> Self {
        Self::new(id, payload, Path::root(id.origin()))
    }

    /// Same instance and payload carried on a different path.
    pub fn with_path(&self, path: Path) -> Self {
        Self::new(self.id, self.payload.clone(), path)
    }

    /// Check the relay's structure as seen by `topology.local_node_id()`
    /// receiving it from `sender`.
    pub fn validate(&self, sender: NodeId, topology: &dyn Topology) -> Result<(), MessageError> {
        let origin = self.id.origin();
        if self.path.origin() != origin {
            return Err(MessageError::OriginMismatch {
                id_origin: origin,
                path_origin: self.path.origin(),
            });
        }

        if !topology.is_member(sender) {
            return Err(MessageError::UnknownSender(sender));
        }
        if !topology.is_peer(sender) {
            return Err(MessageError::NotAPeer(sender));
        }

        if let Some(stranger) = self.path.visited().iter().find(|n| !topology.is_member(*n)) {
            return Err(MessageError::NonMemberOnPath(stranger));
        }

        // The origin's own first send is the only relay whose path may hold the sender.
        let direct_from_origin = sender == origin && self.path.is_origin_only();
        if self.path.contains(sender) && !direct_from_origin {
            return Err(MessageError::SenderOnPath(sender));
        }

        let local = topology.local_node_id();
        if local != origin && self.path.contains(local) {
            return Err(MessageError::ReceiverOnPath(local));
        }

        Ok(())
    }
}

impl NetworkMessage for BroadcastGossip {
    fn message_type_id() -> &'static str {
        "dolev.broadcast"
    }
}
