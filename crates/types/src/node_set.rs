//! Bitset of node identifiers.

use crate::NodeId;
use std::fmt;

const WORDS: usize = 4;
const WORD_BITS: usize = 64;

/// A compact, fixed-capacity set of [`NodeId`]s.
///
/// Membership, insertion and pairwise intersection are a handful of word
/// operations, which keeps path comparison cheap in the disjointness search.
/// Node ids at or above [`NodeSet::CAPACITY`] cannot be represented;
/// [`StaticTopology`](crate::StaticTopology) rejects such memberships up front.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeSet {
    words: [u64; WORDS],
}

impl NodeSet {
    /// Largest representable membership.
    pub const CAPACITY: usize = WORDS * WORD_BITS;

    /// Create an empty set.
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Create a set holding exactly `node`.
    pub fn singleton(node: NodeId) -> Self {
        let mut set = Self::new();
        set.insert(node);
        set
    }

    /// Whether `node` fits in the bitset.
    pub fn can_hold(node: NodeId) -> bool {
        node.index() < Self::CAPACITY
    }

    /// Add a node. Returns true if it was not already present.
    ///
    /// Out-of-range ids are ignored and return false.
    pub fn insert(&mut self, node: NodeId) -> bool {
        if !Self::can_hold(node) {
            return false;
        }
        let (word, bit) = Self::locate(node);
        let was_set = (self.words[word] >> bit) & 1 == 1;
        self.words[word] |= 1 << bit;
        !was_set
    }

    /// Remove a node. Returns true if it was present.
    pub fn remove(&mut self, node: NodeId) -> bool {
        if !self.contains(node) {
            return false;
        }
        let (word, bit) = Self::locate(node);
        self.words[word] &= !(1 << bit);
        true
    }

    /// Check membership.
    pub fn contains(&self, node: NodeId) -> bool {
        if !Self::can_hold(node) {
            return false;
        }
        let (word, bit) = Self::locate(node);
        (self.words[word] >> bit) & 1 == 1
    }

    /// Number of nodes in the set.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Set union.
    pub fn union(&self, other: &NodeSet) -> NodeSet {
        let mut words = [0; WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.words[i] | other.words[i];
        }
        NodeSet { words }
    }

    /// Number of nodes present in both sets.
    pub fn intersection_len(&self, other: &NodeSet) -> usize {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// Check whether every node of `self` is also in `other`.
    pub fn is_subset(&self, other: &NodeSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & !b == 0)
    }

    /// Iterate over members in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..WORD_BITS)
                .filter(move |bit| (word >> bit) & 1 == 1)
                .map(move |bit| NodeId((word_idx * WORD_BITS + bit) as u32))
        })
    }

    fn locate(node: NodeId) -> (usize, usize) {
        (node.index() / WORD_BITS, node.index() % WORD_BITS)
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        let mut set = NodeSet::new();
        for node in iter {
            set.insert(node);
        }
        set
    }
}

impl fmt::Debug for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|n| n.0)).finish()
    }
}
