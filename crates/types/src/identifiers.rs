//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Participant identifier.
///
/// Small, dense, and stable for the lifetime of a run. Used directly as a
/// bit index in [`NodeSet`](crate::NodeSet).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Bit index of this node.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

/// Broadcast instance identifier.
///
/// Generated once by the originator and carried unchanged by every relay of
/// the instance. Outside of structural validation (the path origin must match
/// [`MessageId::origin`]) it is an opaque correlation key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MessageId {
    origin: NodeId,
    sequence: u64,
}

impl MessageId {
    /// Create a message id for the `sequence`-th broadcast of `origin`.
    pub fn new(origin: NodeId, sequence: u64) -> Self {
        Self { origin, sequence }
    }

    /// The node that originated this instance.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// Per-origin sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}-{}", self.origin.0, self.sequence)
    }
}
