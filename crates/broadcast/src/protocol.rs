//! Per-node broadcast behaviour.

use crate::BroadcastInstance;
use dolev_core::Action;
use dolev_messages::BroadcastGossip;
use dolev_types::{MessageId, NodeId, Payload};
use serde::Serialize;
use std::fmt;

/// Counters kept by a broadcast protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// Instances this node originated.
    pub originated: u64,
    /// Instances delivered (originated ones included).
    pub delivered: u64,
    /// Relays accepted for processing.
    pub received: u64,
    /// Relays dropped by structural validation.
    pub malformed: u64,
    /// Relays carrying a path that was already stored.
    pub duplicates: u64,
    /// Relays received after the instance was delivered.
    pub late_relays: u64,
    /// Messages handed to the runner for sending.
    pub messages_sent: u64,
    /// Stored paths replaced by a path they contained.
    pub paths_pruned: u64,
    /// Paths discarded because the per-instance cap was full.
    pub paths_dropped: u64,
    /// Stored paths given up to make room for a less represented sender.
    pub paths_evicted: u64,
}

/// Behaviour of a node participating in broadcasts.
///
/// Implemented by the correct [`ReliableBroadcaster`](crate::ReliableBroadcaster)
/// and by the faulty [`AdversarialNode`](crate::AdversarialNode), so a node
/// can be wired with either without the runners noticing.
pub trait BroadcastProtocol: Send + fmt::Debug {
    /// Originate a new instance carrying `payload`.
    fn broadcast(&mut self, payload: Payload) -> (MessageId, Vec<Action>);

    /// Handle a relay received from the direct peer `from`.
    fn on_broadcast_received(&mut self, from: NodeId, gossip: BroadcastGossip) -> Vec<Action>;

    /// Check if `id` has been delivered locally.
    fn is_delivered(&self, id: &MessageId) -> bool;

    /// The payload delivered under `id`, if any.
    fn delivered_payload(&self, id: &MessageId) -> Option<&Payload>;

    /// Local state of one instance, if this behaviour keeps any.
    fn instance(&self, id: &MessageId) -> Option<&BroadcastInstance>;

    /// Counters for this node.
    fn stats(&self) -> &BroadcastStats;

    /// Short label for logs and reports.
    fn behavior(&self) -> &'static str;
}
