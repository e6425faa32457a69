//! Byzantine node behaviours used to exercise the protocol.

use crate::{BroadcastInstance, BroadcastProtocol, BroadcastStats};
use dolev_core::{Action, OutboundMessage};
use dolev_messages::BroadcastGossip;
use dolev_types::{MessageId, NodeId, Payload, Topology};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// How an [`AdversarialNode`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdversaryMode {
    /// Absorb everything; never relay or deliver.
    #[default]
    Silent,
    /// Relay everything with a corrupted payload, keeping the received path.
    Forge,
}

impl AdversaryMode {
    pub fn label(self) -> &'static str {
        match self {
            AdversaryMode::Silent => "silent",
            AdversaryMode::Forge => "forge",
        }
    }
}

/// A faulty participant.
///
/// Never delivers, and originating anything is a no-op apart from burning a
/// message id.
pub struct AdversarialNode {
    topology: Arc<dyn Topology>,
    mode: AdversaryMode,
    next_sequence: u64,
    stats: BroadcastStats,
}

impl AdversarialNode {
    pub fn new(topology: Arc<dyn Topology>, mode: AdversaryMode) -> Self {
        Self {
            topology,
            mode,
            next_sequence: 0,
            stats: BroadcastStats::default(),
        }
    }

    pub fn mode(&self) -> AdversaryMode {
        self.mode
    }

    /// The payload this node substitutes for `genuine`.
    pub fn forge(genuine: &Payload) -> Payload {
        let mut forged = Vec::with_capacity(genuine.len() + 7);
        forged.extend_from_slice(b"forged:");
        forged.extend_from_slice(genuine);
        Payload::from(forged)
    }
}

impl BroadcastProtocol for AdversarialNode {
    fn broadcast(&mut self, _payload: Payload) -> (MessageId, Vec<Action>) {
        let id = MessageId::new(self.topology.local_node_id(), self.next_sequence);
        self.next_sequence += 1;
        (id, vec![])
    }

    fn on_broadcast_received(&mut self, from: NodeId, gossip: BroadcastGossip) -> Vec<Action> {
        self.stats.received += 1;
        let local = self.topology.local_node_id();
        match self.mode {
            AdversaryMode::Silent => {
                trace!(node = local.0, peer = from.0, id = %gossip.id, "Absorbing relay");
                vec![]
            }
            AdversaryMode::Forge => {
                // Reuse the received path so the forgery passes validation downstream.
                let forged = BroadcastGossip::new(gossip.id, Self::forge(&gossip.payload), gossip.path);
                let actions: Vec<Action> = self
                    .topology
                    .peers()
                    .iter()
                    .filter(|peer| !gossip.path.contains(*peer))
                    .map(|to| Action::SendTo {
                        to,
                        message: OutboundMessage::Broadcast(forged.clone()),
                    })
                    .collect();
                trace!(node = local.0, peer = from.0, id = %gossip.id, targets = actions.len(), "Forging relay");
                self.stats.messages_sent += actions.len() as u64;
                actions
            }
        }
    }

    fn is_delivered(&self, _id: &MessageId) -> bool {
        false
    }

    fn delivered_payload(&self, _id: &MessageId) -> Option<&Payload> {
        None
    }

    fn instance(&self, _id: &MessageId) -> Option<&BroadcastInstance> {
        None
    }

    fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    fn behavior(&self) -> &'static str {
        self.mode.label()
    }
}

impl fmt::Debug for AdversarialNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdversarialNode")
            .field("node", &self.topology.local_node_id())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolev_types::{NetworkGraph, Path, StaticTopology};

    fn node(mode: AdversaryMode) -> AdversarialNode {
        let graph = Arc::new(NetworkGraph::complete(5).unwrap());
        let topology = StaticTopology::new(NodeId(2), graph).unwrap();
        AdversarialNode::new(topology.into_arc(), mode)
    }

    fn hello() -> BroadcastGossip {
        BroadcastGossip::originate(MessageId::new(NodeId(0), 0), Payload::from_static(b"hello"))
    }

    #[test]
    fn test_silent_absorbs_everything() {
        let mut adversary = node(AdversaryMode::Silent);
        let (_, actions) = adversary.broadcast(Payload::from_static(b"x"));
        assert!(actions.is_empty());

        let gossip = hello();
        let id = gossip.id;
        assert!(adversary.on_broadcast_received(NodeId(0), gossip).is_empty());
        assert!(!adversary.is_delivered(&id));
        assert_eq!(adversary.stats().received, 1);
    }

    #[test]
    fn test_forge_relays_corrupted_payload() {
        let mut adversary = node(AdversaryMode::Forge);
        let actions = adversary.on_broadcast_received(NodeId(0), hello());

        // Everyone but the origin (already on the path).
        assert_eq!(actions.len(), 3);
        for action in &actions {
            let Action::SendTo { to, message } = action else {
                panic!("unexpected action {action:?}");
            };
            let gossip = message.as_broadcast().unwrap();
            assert_ne!(*to, NodeId(0));
            assert_eq!(gossip.path, Path::root(NodeId(0)));
            assert_eq!(gossip.payload, Payload::from_static(b"forged:hello"));
        }
        assert_eq!(adversary.behavior(), "forge");
    }
}
