//! Correct-node broadcast state machine.

use crate::{
    BroadcastConfig, BroadcastInstance, BroadcastProtocol, BroadcastStats, DeliveryReason,
    DisjointPathAnalyzer, PathRecord,
};
use dolev_core::{Action, OutboundMessage};
use dolev_messages::BroadcastGossip;
use dolev_types::{MessageId, NodeId, NodeSet, Path, Payload, Topology};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Dolev reliable broadcast for a correct node.
///
/// Delivery of an instance happens on the first of:
/// - originating it,
/// - receiving it directly from the originator,
/// - observing more than `f` node-disjoint paths for the same payload.
///
/// Every accepted relay is extended with its sender and forwarded to the
/// peers not on the path, until the instance is delivered.
pub struct ReliableBroadcaster {
    /// Network topology (membership and direct peers).
    topology: Arc<dyn Topology>,

    config: BroadcastConfig,

    /// Instances in first-seen order, never removed during a run.
    instances: IndexMap<MessageId, BroadcastInstance>,

    /// Sequence for the next originated message id.
    next_sequence: u64,

    stats: BroadcastStats,
}

impl ReliableBroadcaster {
    /// Create a broadcaster for `topology.local_node_id()`.
    ///
    /// `config` is expected to have passed [`BroadcastConfig::validate`].
    pub fn new(topology: Arc<dyn Topology>, config: BroadcastConfig) -> Self {
        Self {
            topology,
            config,
            instances: IndexMap::new(),
            next_sequence: 0,
            stats: BroadcastStats::default(),
        }
    }

    pub fn local_node_id(&self) -> NodeId {
        self.topology.local_node_id()
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// All instances seen so far, in first-seen order.
    pub fn instances(&self) -> impl Iterator<Item = &BroadcastInstance> {
        self.instances.values()
    }

    /// Ids of delivered instances, in first-seen order.
    pub fn delivered_ids(&self) -> Vec<MessageId> {
        self.instances
            .values()
            .filter(|inst| inst.is_delivered())
            .map(|inst| inst.id())
            .collect()
    }

    fn originate(&mut self, payload: Payload) -> (MessageId, Vec<Action>) {
        let local = self.local_node_id();
        let id = MessageId::new(local, self.next_sequence);
        self.next_sequence += 1;

        let mut instance = BroadcastInstance::new(id, self.config.max_tracked_paths);
        instance.mark_delivered(payload.clone(), DeliveryReason::Originated);
        self.instances.insert(id, instance);
        self.stats.originated += 1;
        self.stats.delivered += 1;

        info!(
            node = local.0,
            id = %id,
            bytes = payload.len(),
            "Originating broadcast"
        );

        let gossip = BroadcastGossip::originate(id, payload.clone());
        let mut actions = self.send_to_all(self.topology.peers(), &gossip);
        actions.push(Action::EmitDelivered { id, payload });
        (id, actions)
    }

    fn receive(&mut self, from: NodeId, gossip: BroadcastGossip) -> Vec<Action> {
        let local = self.local_node_id();
        if let Err(e) = gossip.validate(from, self.topology.as_ref()) {
            self.stats.malformed += 1;
            debug!(node = local.0, peer = from.0, id = %gossip.id, error = %e, "Dropping malformed relay");
            return vec![];
        }

        let id = gossip.id;
        let origin = id.origin();
        if origin == local && !self.instances.contains_key(&id) {
            // Claims to be ours, but we never originated it.
            self.stats.malformed += 1;
            debug!(node = local.0, peer = from.0, id = %id, "Dropping relay of unknown own instance");
            return vec![];
        }
        self.stats.received += 1;
        let threshold = self.config.fault_tolerance;
        let max_paths = self.config.max_tracked_paths;
        let instance = self
            .instances
            .entry(id)
            .or_insert_with(|| BroadcastInstance::new(id, max_paths));

        let was_delivered = instance.is_delivered();
        let origin_only = gossip.path.is_origin_only();
        if origin_only {
            instance.record_direct_deliverer(from);
        }

        // The originator's own first hop is already on the path.
        let extended = if from == origin && origin_only {
            gossip.path
        } else {
            match gossip.path.extend(from) {
                Ok(path) => path,
                Err(e) => {
                    self.stats.malformed += 1;
                    debug!(node = local.0, peer = from.0, id = %id, error = %e, "Cannot extend relayed path");
                    return vec![];
                }
            }
        };

        let record = instance.record_path(&gossip.payload, from, extended);
        match record {
            PathRecord::Added { pruned } => self.stats.paths_pruned += pruned as u64,
            PathRecord::Replaced { evicted_from } => {
                self.stats.paths_evicted += 1;
                debug!(node = local.0, id = %id, peer = from.0, evicted_from = evicted_from.0, "Path cap reached, evicting path");
            }
            PathRecord::Duplicate => self.stats.duplicates += 1,
            PathRecord::Dominated => {}
            PathRecord::Dropped => {
                self.stats.paths_dropped += 1;
                debug!(node = local.0, id = %id, peer = from.0, "Path cap reached, dropping path");
            }
        }

        if was_delivered {
            self.stats.late_relays += 1;
            trace!(node = local.0, peer = from.0, id = %id, "Late relay");
            return vec![];
        }

        // Downstream peers already hold this path or one that dominates it.
        if matches!(record, PathRecord::Duplicate | PathRecord::Dominated) {
            trace!(node = local.0, peer = from.0, id = %id, ?record, "Not relaying known path");
            return vec![];
        }

        let reason = if from == origin && origin_only {
            Some(DeliveryReason::DirectFromOrigin)
        } else if instance.exceeds_threshold(&gossip.payload, threshold) {
            let paths = instance.paths_for(&gossip.payload);
            let witness = DisjointPathAnalyzer::find_disjoint_set(paths);
            debug!(
                node = local.0,
                id = %id,
                witness = ?witness
                    .iter()
                    .map(|&i| paths[i].intermediates().map(|n| n.0).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
                "Disjoint path threshold crossed"
            );
            Some(DeliveryReason::DisjointPaths(witness.len()))
        } else {
            None
        };

        // Relay to peers that are neither on the path nor already settled.
        let mut relay_targets = self.topology.peers();
        for node in extended.visited().union(instance.direct_deliverers()).iter() {
            relay_targets.remove(node);
        }

        let delivered_now = match reason {
            Some(reason) => instance.mark_delivered(gossip.payload.clone(), reason),
            None => false,
        };

        let relay = gossip.with_path(extended);
        debug!(
            node = local.0,
            peer = from.0,
            id = %id,
            path_len = extended.len(),
            targets = relay_targets.len(),
            "Relaying"
        );
        let mut actions = self.send_to_all(relay_targets, &relay);

        if let Some(reason) = reason.filter(|_| delivered_now) {
            self.stats.delivered += 1;
            info!(
                node = local.0,
                id = %id,
                reason = ?reason,
                "Delivered broadcast"
            );

            // Settled signal: origin-only path to every peer not already sent one.
            let mut reset_targets = self.topology.peers();
            if extended.is_origin_only() {
                for node in relay_targets.iter() {
                    reset_targets.remove(node);
                }
            }
            let reset = gossip.with_path(Path::root(origin));
            actions.extend(self.send_to_all(reset_targets, &reset));
            actions.push(Action::EmitDelivered {
                id,
                payload: gossip.payload,
            });
        }

        actions
    }

    fn send_to_all(&mut self, targets: NodeSet, gossip: &BroadcastGossip) -> Vec<Action> {
        let actions: Vec<Action> = targets
            .iter()
            .map(|to| Action::SendTo {
                to,
                message: OutboundMessage::Broadcast(gossip.clone()),
            })
            .collect();
        self.stats.messages_sent += actions.len() as u64;
        actions
    }
}

impl BroadcastProtocol for ReliableBroadcaster {
    fn broadcast(&mut self, payload: Payload) -> (MessageId, Vec<Action>) {
        self.originate(payload)
    }

    fn on_broadcast_received(&mut self, from: NodeId, gossip: BroadcastGossip) -> Vec<Action> {
        self.receive(from, gossip)
    }

    fn is_delivered(&self, id: &MessageId) -> bool {
        self.instances.get(id).is_some_and(|inst| inst.is_delivered())
    }

    fn delivered_payload(&self, id: &MessageId) -> Option<&Payload> {
        self.instances.get(id).and_then(|inst| inst.delivered_payload())
    }

    fn instance(&self, id: &MessageId) -> Option<&BroadcastInstance> {
        self.instances.get(id)
    }

    fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    fn behavior(&self) -> &'static str {
        "correct"
    }
}

impl fmt::Debug for ReliableBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliableBroadcaster")
            .field("node", &self.local_node_id())
            .field("fault_tolerance", &self.config.fault_tolerance)
            .field("instances", &self.instances.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolev_types::{NetworkGraph, StaticTopology};
    use tracing_test::traced_test;

    fn broadcaster(local: u32, graph: &Arc<NetworkGraph>) -> ReliableBroadcaster {
        let topology = StaticTopology::new(NodeId(local), graph.clone()).unwrap();
        ReliableBroadcaster::new(topology.into_arc(), BroadcastConfig::default())
    }

    fn complete(n: u32) -> Arc<NetworkGraph> {
        Arc::new(NetworkGraph::complete(n).unwrap())
    }

    fn hello_from(origin: u32) -> BroadcastGossip {
        BroadcastGossip::originate(MessageId::new(NodeId(origin), 0), Payload::from_static(b"hello"))
    }

    fn sends(actions: &[Action]) -> Vec<(u32, Path)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::SendTo { to, message } => {
                    Some((to.0, message.as_broadcast().unwrap().path))
                }
                _ => None,
            })
            .collect()
    }

    fn delivered(actions: &[Action]) -> Vec<MessageId> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::EmitDelivered { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[traced_test]
    #[test]
    fn test_originate_sends_to_all_peers_and_delivers() {
        let mut node = broadcaster(0, &complete(5));
        let (id, actions) = node.broadcast(Payload::from_static(b"hello"));

        let root = Path::root(NodeId(0));
        assert_eq!(sends(&actions), vec![(1, root), (2, root), (3, root), (4, root)]);
        assert_eq!(delivered(&actions), vec![id]);
        assert!(node.is_delivered(&id));
        assert_eq!(
            node.instance(&id).unwrap().delivery_reason(),
            Some(DeliveryReason::Originated)
        );

        let (next, _) = node.broadcast(Payload::from_static(b"again"));
        assert_ne!(id, next);
        assert_eq!(node.stats().originated, 2);
    }

    #[traced_test]
    #[test]
    fn test_direct_from_origin_delivers() {
        let mut node = broadcaster(1, &complete(5));
        let gossip = hello_from(0);
        let id = gossip.id;

        let actions = node.on_broadcast_received(NodeId(0), gossip);

        // Relay of the root path to 2, 3, 4 doubles as the settled signal;
        // only the origin still needs one.
        let root = Path::root(NodeId(0));
        assert_eq!(sends(&actions), vec![(2, root), (3, root), (4, root), (0, root)]);
        assert_eq!(delivered(&actions), vec![id]);
        assert_eq!(
            node.instance(&id).unwrap().delivery_reason(),
            Some(DeliveryReason::DirectFromOrigin)
        );
        assert_eq!(node.delivered_payload(&id), Some(&Payload::from_static(b"hello")));
    }

    #[test]
    fn test_delivers_after_disjoint_paths() {
        let mut node = broadcaster(3, &complete(5));
        let id = hello_from(0).id;

        // Node 1 relays the root path: stored as {0, 1}.
        let actions = node.on_broadcast_received(NodeId(1), hello_from(0));
        assert!(!node.is_delivered(&id));
        let via_1 = Path::from_nodes(NodeId(0), [NodeId(1)]).unwrap();
        assert_eq!(sends(&actions), vec![(2, via_1), (4, via_1)]);
        assert!(node.instance(&id).unwrap().direct_deliverers().contains(NodeId(1)));

        // A second, disjoint path crosses f = 1.
        let actions = node.on_broadcast_received(NodeId(2), hello_from(0));
        assert_eq!(delivered(&actions), vec![id]);
        assert_eq!(
            node.instance(&id).unwrap().delivery_reason(),
            Some(DeliveryReason::DisjointPaths(2))
        );
    }

    #[test]
    fn test_overlapping_paths_do_not_deliver() {
        let graph = complete(6);
        let mut node = broadcaster(5, &graph);
        let id = MessageId::new(NodeId(0), 0);
        let payload = Payload::from_static(b"hello");

        let via = |relays: &[u32]| {
            let path = Path::from_nodes(NodeId(0), relays.iter().map(|&n| NodeId(n))).unwrap();
            BroadcastGossip::new(id, payload.clone(), path)
        };

        // Stored as {0,1,2} and {0,2,3}: both pass through node 2.
        node.on_broadcast_received(NodeId(2), via(&[1]));
        node.on_broadcast_received(NodeId(3), via(&[2]));
        assert!(!node.is_delivered(&id));

        // {0,3,4} is disjoint from {0,1,2}.
        node.on_broadcast_received(NodeId(4), via(&[3]));
        assert!(node.is_delivered(&id));
    }

    #[test]
    fn test_forged_payload_never_borrows_paths() {
        let mut node = broadcaster(3, &complete(5));
        let genuine = hello_from(0);
        let id = genuine.id;
        let forged = BroadcastGossip::new(id, Payload::from_static(b"evil"), Path::root(NodeId(0)));

        node.on_broadcast_received(NodeId(1), genuine.clone());
        node.on_broadcast_received(NodeId(2), forged);
        assert!(!node.is_delivered(&id));
        assert_eq!(node.instance(&id).unwrap().variant_count(), 2);

        node.on_broadcast_received(NodeId(4), genuine);
        assert_eq!(node.delivered_payload(&id), Some(&Payload::from_static(b"hello")));
    }

    #[traced_test]
    #[test]
    fn test_late_relays_are_bookkeeping_only() {
        let mut node = broadcaster(1, &complete(5));
        let id = hello_from(0).id;
        node.on_broadcast_received(NodeId(0), hello_from(0));

        for peer in [2, 3, 4] {
            let actions = node.on_broadcast_received(NodeId(peer), hello_from(0));
            assert!(actions.is_empty());
        }
        // Same relay again is idempotent.
        assert!(node.on_broadcast_received(NodeId(2), hello_from(0)).is_empty());

        let instance = node.instance(&id).unwrap();
        assert_eq!(instance.late_paths(), 4);
        assert_eq!(instance.disjoint_path_count(), 4);
        assert_eq!(node.stats().late_relays, 4);
        assert_eq!(node.stats().duplicates, 1);
        assert_eq!(node.stats().delivered, 1);
    }

    #[traced_test]
    #[test]
    fn test_known_paths_are_not_relayed_again() {
        let topology = StaticTopology::new(NodeId(5), complete(8)).unwrap();
        let mut node = ReliableBroadcaster::new(
            topology.into_arc(),
            BroadcastConfig::default().with_fault_tolerance(2),
        );
        let via_1 = hello_from(0).with_path(Path::from_nodes(NodeId(0), [NodeId(1)]).unwrap());
        let id = via_1.id;

        // Stored as {0, 1, 2}; fans out to everyone off the path.
        let sent: Vec<usize> = (0..3)
            .map(|_| sends(&node.on_broadcast_received(NodeId(2), via_1.clone())).len())
            .collect();
        assert_eq!(sent, vec![4, 0, 0]);
        assert_eq!(node.stats().duplicates, 2);

        // {0, 1} prunes {0, 1, 2}; replaying the longer path is now dominated.
        assert!(!sends(&node.on_broadcast_received(NodeId(1), hello_from(0))).is_empty());
        assert!(sends(&node.on_broadcast_received(NodeId(2), via_1)).is_empty());
        assert!(!node.is_delivered(&id));
    }

    #[traced_test]
    #[test]
    fn test_flooding_neighbour_cannot_exhaust_path_cap() {
        let mut node = broadcaster(5, &complete(14));
        let id = hello_from(0).id;
        let cap = node.config().max_tracked_paths;

        // Node 9 relays `cap` incomparable four-relay paths, all through itself.
        let pool = [4, 6, 7, 8, 10, 11, 12, 13];
        let mut flood = Vec::new();
        for a in 0..pool.len() {
            for b in a + 1..pool.len() {
                for c in b + 1..pool.len() {
                    for d in c + 1..pool.len() {
                        flood.push([pool[a], pool[b], pool[c], pool[d]]);
                    }
                }
            }
        }
        for relays in flood.iter().take(cap) {
            let path = Path::from_nodes(NodeId(0), relays.iter().map(|&n| NodeId(n))).unwrap();
            node.on_broadcast_received(NodeId(9), hello_from(0).with_path(path));
        }
        assert_eq!(node.instance(&id).unwrap().paths_for(&hello_from(0).payload).len(), cap);
        assert!(!node.is_delivered(&id));

        for peer in [1, 2, 3] {
            node.on_broadcast_received(NodeId(peer), hello_from(0));
        }

        assert!(node.is_delivered(&id));
        assert!(matches!(
            node.instance(&id).unwrap().delivery_reason(),
            Some(DeliveryReason::DisjointPaths(_))
        ));
        assert!(node.stats().paths_evicted >= 1);
        assert_eq!(node.stats().paths_dropped, 0);
    }

    #[test]
    fn test_malformed_relays_are_dropped() {
        let graph = Arc::new(NetworkGraph::ring_lattice(6, 1).unwrap());
        let mut node = broadcaster(2, &graph);

        // Node 4 is a member but not adjacent to node 2.
        assert!(node.on_broadcast_received(NodeId(4), hello_from(0)).is_empty());
        // Path already passes through the receiver.
        let looped = hello_from(0).with_path(Path::from_nodes(NodeId(0), [NodeId(2)]).unwrap());
        assert!(node.on_broadcast_received(NodeId(1), looped).is_empty());

        assert_eq!(node.stats().malformed, 2);
        assert_eq!(node.instances().count(), 0);
    }

    #[test]
    fn test_unknown_own_instance_is_dropped() {
        let mut node = broadcaster(0, &complete(4));
        let claimed = hello_from(0);
        assert!(node.on_broadcast_received(NodeId(1), claimed.clone()).is_empty());
        assert!(!node.is_delivered(&claimed.id));
        assert_eq!(node.stats().malformed, 1);
    }
}
