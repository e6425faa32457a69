//! Traversal record of a relayed broadcast.

use crate::{NodeId, NodeSet};
use std::fmt;

/// Errors raised when building or extending a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The node is already on the path; a flood relay never revisits a node.
    #[error("{0} is already on the path")]
    AlreadyVisited(NodeId),

    /// The node id does not fit in a [`NodeSet`].
    #[error("{0} exceeds the node set capacity")]
    OutOfRange(NodeId),
}

/// The set of nodes a broadcast instance has passed through.
///
/// The origin is always a member of `visited`. Paths are immutable values:
/// [`Path::extend`] returns a new path.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Path {
    origin: NodeId,
    visited: NodeSet,
}

impl Path {
    /// The root path `{origin}` built by the originator.
    pub fn root(origin: NodeId) -> Self {
        Self {
            origin,
            visited: NodeSet::singleton(origin),
        }
    }

    /// Build a path from an origin and the relays it passed through.
    pub fn from_nodes(
        origin: NodeId,
        relays: impl IntoIterator<Item = NodeId>,
    ) -> Result<Self, PathError> {
        if !NodeSet::can_hold(origin) {
            return Err(PathError::OutOfRange(origin));
        }
        relays
            .into_iter()
            .try_fold(Self::root(origin), |path, node| path.extend(node))
    }

    /// The broadcast originator.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// All visited nodes, origin included.
    pub fn visited(&self) -> &NodeSet {
        &self.visited
    }

    /// Return a new path with `node` appended.
    pub fn extend(&self, node: NodeId) -> Result<Path, PathError> {
        if !NodeSet::can_hold(node) {
            return Err(PathError::OutOfRange(node));
        }
        if self.visited.contains(node) {
            return Err(PathError::AlreadyVisited(node));
        }
        let mut visited = self.visited;
        visited.insert(node);
        Ok(Path {
            origin: self.origin,
            visited,
        })
    }

    /// Membership test.
    pub fn contains(&self, node: NodeId) -> bool {
        self.visited.contains(node)
    }

    /// True if nothing beyond the origin has been visited.
    pub fn is_origin_only(&self) -> bool {
        self.visited.len() == 1
    }

    /// Number of visited nodes, origin included.
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    /// Always false: a path contains at least its origin.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Visited nodes other than the origin.
    pub fn intermediates(&self) -> impl Iterator<Item = NodeId> + '_ {
        let origin = self.origin;
        self.visited.iter().filter(move |n| *n != origin)
    }

    /// Node-disjointness: same origin, and the only shared node is the origin.
    pub fn disjoint_from(&self, other: &Path) -> bool {
        self.origin == other.origin && self.visited.intersection_len(&other.visited) == 1
    }

    /// True if `self` carries at least one relay and is a (non-strict) subset
    /// of `other` with the same origin.
    ///
    /// The two paths then conflict, and anything that conflicts with `self`
    /// also conflicts with `other`, so swapping `other` for `self` never
    /// shrinks a disjoint set. The origin-only path conflicts with nothing
    /// and dominates nothing.
    pub fn dominates(&self, other: &Path) -> bool {
        !self.is_origin_only()
            && self.origin == other.origin
            && self.visited.is_subset(&other.visited)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({} via {:?})", self.origin.0, self.visited)
    }
}
