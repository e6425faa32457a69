//! Per-message broadcast state.

use crate::analyzer::DisjointPathAnalyzer;
use dolev_types::{MessageId, NodeId, NodeSet, Path, Payload};
use serde::Serialize;
use std::collections::BTreeMap;

/// Why an instance was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryReason {
    /// We are the originator.
    Originated,
    /// The originator sent it to us over a direct link.
    DirectFromOrigin,
    /// This many disjoint paths were observed when the threshold was crossed.
    DisjointPaths(usize),
}

/// Lifecycle of an instance that has been observed at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Delivered,
}

/// Outcome of recording an observed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRecord {
    /// New information; `pruned` stored paths were superseded by it.
    Added { pruned: usize },
    /// Exactly this path was already stored.
    Duplicate,
    /// A stored path already dominates it.
    Dominated,
    /// The cap was full; a path relayed by `evicted_from`, the sender holding
    /// the most stored paths, made room for this one.
    Replaced { evicted_from: NodeId },
    /// The cap is full and the sender already holds its share.
    Dropped,
}

/// Paths observed for one payload value under a message id.
///
/// `senders[i]` is the peer that relayed `paths[i]` to us.
#[derive(Debug, Clone)]
struct PayloadVariant {
    payload: Payload,
    paths: Vec<Path>,
    senders: Vec<NodeId>,
}

impl PayloadVariant {
    fn remove(&mut self, index: usize) {
        self.paths.remove(index);
        self.senders.remove(index);
    }

    /// Drop every stored path that `path` dominates. Returns how many went.
    fn prune_dominated_by(&mut self, path: &Path) -> usize {
        let before = self.paths.len();
        let mut i = 0;
        while i < self.paths.len() {
            if path.dominates(&self.paths[i]) {
                self.remove(i);
            } else {
                i += 1;
            }
        }
        before - self.paths.len()
    }

    /// Pick a stored path to give up for a new one relayed by `from`.
    ///
    /// Only the sender holding the most paths gives one up, and only while it
    /// holds at least two more than `from`. Its longest path goes first.
    fn eviction_candidate(&self, from: NodeId) -> Option<usize> {
        let mut counts: BTreeMap<NodeId, usize> = BTreeMap::new();
        for sender in &self.senders {
            *counts.entry(*sender).or_default() += 1;
        }
        let own = counts.get(&from).copied().unwrap_or(0);
        let (heaviest, count) = counts
            .iter()
            .fold(None, |best: Option<(NodeId, usize)>, (&sender, &count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((sender, count)),
            })?;
        if heaviest == from || count <= own + 1 {
            return None;
        }
        self.senders
            .iter()
            .enumerate()
            .filter(|(_, sender)| **sender == heaviest)
            .max_by_key(|(i, _)| self.paths[*i].len())
            .map(|(i, _)| i)
    }
}

/// State of one broadcast instance at one node.
///
/// Paths are tracked separately for every payload value received under the
/// id, so relays carrying a forged payload never count towards the genuine
/// one (or the other way round).
#[derive(Debug, Clone)]
pub struct BroadcastInstance {
    id: MessageId,
    variants: Vec<PayloadVariant>,
    delivered: Option<(Payload, DeliveryReason)>,
    direct_deliverers: NodeSet,
    late_paths: usize,
    max_tracked_paths: usize,
}

impl BroadcastInstance {
    /// Create an instance on first observation of `id`.
    pub fn new(id: MessageId, max_tracked_paths: usize) -> Self {
        Self {
            id,
            variants: Vec::new(),
            delivered: None,
            direct_deliverers: NodeSet::new(),
            late_paths: 0,
            max_tracked_paths,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn status(&self) -> InstanceStatus {
        if self.delivered.is_some() {
            InstanceStatus::Delivered
        } else {
            InstanceStatus::Pending
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered.is_some()
    }

    /// The payload that was delivered, if any.
    pub fn delivered_payload(&self) -> Option<&Payload> {
        self.delivered.as_ref().map(|(payload, _)| payload)
    }

    pub fn delivery_reason(&self) -> Option<DeliveryReason> {
        self.delivered.as_ref().map(|(_, reason)| *reason)
    }

    /// Peers known to have delivered this instance on their own.
    pub fn direct_deliverers(&self) -> &NodeSet {
        &self.direct_deliverers
    }

    /// Returns true if `peer` was not yet known as a direct deliverer.
    pub fn record_direct_deliverer(&mut self, peer: NodeId) -> bool {
        self.direct_deliverers.insert(peer)
    }

    /// Paths observed after delivery.
    pub fn late_paths(&self) -> usize {
        self.late_paths
    }

    /// Count of distinct payload values seen under this id.
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    /// Paths currently stored for `payload`.
    pub fn paths_for(&self, payload: &Payload) -> &[Path] {
        self.variants
            .iter()
            .find(|v| &v.payload == payload)
            .map(|v| v.paths.as_slice())
            .unwrap_or(&[])
    }

    /// Paths stored for the delivered payload (empty while pending).
    pub fn delivered_paths(&self) -> &[Path] {
        match self.delivered_payload() {
            Some(payload) => self.paths_for(payload),
            None => &[],
        }
    }

    /// Size of the largest disjoint set among the delivered payload's paths.
    pub fn disjoint_path_count(&self) -> usize {
        DisjointPathAnalyzer::max_disjoint_set_size(self.delivered_paths())
    }

    /// Store `path`, relayed by `from`, under `payload`.
    ///
    /// The stored set stays free of dominated paths. Once it holds
    /// `max_tracked_paths` entries, a newcomer only gets in by evicting a path
    /// of the sender with the most stored paths, so no single neighbour can
    /// crowd the others out.
    pub fn record_path(&mut self, payload: &Payload, from: NodeId, path: Path) -> PathRecord {
        if self.is_delivered() {
            self.late_paths += 1;
        }

        let cap = self.max_tracked_paths;
        let variant = self.variant_mut(payload);
        if variant.paths.contains(&path) {
            return PathRecord::Duplicate;
        }
        if variant.paths.iter().any(|p| p.dominates(&path)) {
            return PathRecord::Dominated;
        }

        let pruned = variant.prune_dominated_by(&path);

        let mut record = PathRecord::Added { pruned };
        if variant.paths.len() >= cap {
            let Some(index) = variant.eviction_candidate(from) else {
                return PathRecord::Dropped;
            };
            record = PathRecord::Replaced {
                evicted_from: variant.senders[index],
            };
            variant.remove(index);
        }
        variant.paths.push(path);
        variant.senders.push(from);
        record
    }

    /// Check whether `payload` has more than `threshold` disjoint paths.
    pub fn exceeds_threshold(&self, payload: &Payload, threshold: usize) -> bool {
        DisjointPathAnalyzer::exceeds(self.paths_for(payload), threshold)
    }

    /// Transition to delivered. Returns false if the instance already was.
    pub fn mark_delivered(&mut self, payload: Payload, reason: DeliveryReason) -> bool {
        if self.delivered.is_some() {
            return false;
        }
        self.delivered = Some((payload, reason));
        true
    }

    fn variant_mut(&mut self, payload: &Payload) -> &mut PayloadVariant {
        let index = match self.variants.iter().position(|v| &v.payload == payload) {
            Some(index) => index,
            None => {
                self.variants.push(PayloadVariant {
                    payload: payload.clone(),
                    paths: Vec::new(),
                    senders: Vec::new(),
                });
                self.variants.len() - 1
            }
        };
        &mut self.variants[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(relays: &[u32]) -> Path {
        Path::from_nodes(NodeId(0), relays.iter().map(|&n| NodeId(n))).unwrap()
    }

    /// Record `relays` as relayed by the last node on it (the origin if none).
    fn record(inst: &mut BroadcastInstance, payload: &Payload, relays: &[u32]) -> PathRecord {
        let from = NodeId(relays.last().copied().unwrap_or(0));
        inst.record_path(payload, from, path(relays))
    }

    fn instance() -> BroadcastInstance {
        BroadcastInstance::new(MessageId::new(NodeId(0), 0), 64)
    }

    #[test]
    fn test_record_path_dedup_and_domination() {
        let hello = Payload::from_static(b"hello");
        let mut inst = instance();

        assert_eq!(record(&mut inst, &hello, &[1, 2]), PathRecord::Added { pruned: 0 });
        assert_eq!(record(&mut inst, &hello, &[1, 2]), PathRecord::Duplicate);
        assert_eq!(record(&mut inst, &hello, &[1, 2, 3]), PathRecord::Dominated);
        assert_eq!(record(&mut inst, &hello, &[1]), PathRecord::Added { pruned: 1 });
        assert_eq!(inst.paths_for(&hello), &[path(&[1])]);
    }

    #[test]
    fn test_origin_only_path_prunes_nothing() {
        let hello = Payload::from_static(b"hello");
        let mut inst = instance();

        record(&mut inst, &hello, &[1]);
        record(&mut inst, &hello, &[2]);
        assert_eq!(record(&mut inst, &hello, &[]), PathRecord::Added { pruned: 0 });
        assert_eq!(inst.paths_for(&hello).len(), 3);
        assert!(inst.exceeds_threshold(&hello, 2));
    }

    #[test]
    fn test_payload_variants_are_separate() {
        let genuine = Payload::from_static(b"hello");
        let forged = Payload::from_static(b"evil");
        let mut inst = instance();

        record(&mut inst, &genuine, &[1]);
        record(&mut inst, &forged, &[2]);
        record(&mut inst, &forged, &[3]);

        assert_eq!(inst.variant_count(), 2);
        assert!(!inst.exceeds_threshold(&genuine, 1));
        assert!(inst.exceeds_threshold(&forged, 1));
    }

    #[test]
    fn test_cap_drops_paths_once_shares_are_even() {
        let hello = Payload::from_static(b"hello");
        let mut inst = BroadcastInstance::new(MessageId::new(NodeId(0), 0), 2);

        record(&mut inst, &hello, &[1]);
        record(&mut inst, &hello, &[2]);
        // Senders 1 and 2 hold one path each: nobody has a surplus to give up.
        assert_eq!(record(&mut inst, &hello, &[3]), PathRecord::Dropped);
        assert_eq!(inst.paths_for(&hello).len(), 2);
    }

    #[test]
    fn test_full_cap_evicts_from_flooding_sender() {
        let hello = Payload::from_static(b"hello");
        let mut inst = BroadcastInstance::new(MessageId::new(NodeId(0), 0), 3);

        // Sender 9 fills the cap with incomparable paths.
        for relays in [&[4, 6][..], &[4, 7][..], &[6, 7, 8][..]] {
            let stored = inst.record_path(&hello, NodeId(9), path(&[relays[0], relays[1], 9]));
            assert!(matches!(stored, PathRecord::Added { .. }));
        }
        // Sender 9 cannot evict its own paths.
        assert_eq!(
            inst.record_path(&hello, NodeId(9), path(&[10, 9])),
            PathRecord::Dropped
        );

        assert_eq!(
            record(&mut inst, &hello, &[1]),
            PathRecord::Replaced { evicted_from: NodeId(9) }
        );
        assert_eq!(
            record(&mut inst, &hello, &[2]),
            PathRecord::Replaced { evicted_from: NodeId(9) }
        );
        assert_eq!(inst.paths_for(&hello).len(), 3);
        assert!(inst.paths_for(&hello).contains(&path(&[1])));
        assert!(inst.paths_for(&hello).contains(&path(&[2])));
        assert!(inst.exceeds_threshold(&hello, 2));
    }

    #[test]
    fn test_delivery_is_terminal() {
        let hello = Payload::from_static(b"hello");
        let mut inst = instance();
        assert_eq!(inst.status(), InstanceStatus::Pending);
        assert!(inst.delivered_paths().is_empty());

        assert!(inst.mark_delivered(hello.clone(), DeliveryReason::DirectFromOrigin));
        assert!(!inst.mark_delivered(Payload::from_static(b"other"), DeliveryReason::Originated));

        assert_eq!(inst.status(), InstanceStatus::Delivered);
        assert_eq!(inst.delivered_payload(), Some(&hello));
        assert_eq!(inst.delivery_reason(), Some(DeliveryReason::DirectFromOrigin));
    }

    #[test]
    fn test_late_paths_are_counted() {
        let hello = Payload::from_static(b"hello");
        let mut inst = instance();
        record(&mut inst, &hello, &[]);
        inst.mark_delivered(hello.clone(), DeliveryReason::DirectFromOrigin);

        record(&mut inst, &hello, &[2]);
        record(&mut inst, &hello, &[3]);
        assert_eq!(inst.late_paths(), 2);
        assert_eq!(inst.disjoint_path_count(), 3);
    }
}
