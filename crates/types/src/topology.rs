//! Topology trait and static implementation.
//!
//! Membership and the neighbour relation are fixed for the run. The graph also
//! answers the connectivity question the broadcast's safety argument depends
//! on: how many internally node-disjoint paths exist between two members.

use crate::{NodeId, NodeSet};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Errors that can occur when building a topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// An edge or local id refers to a node outside the membership.
    #[error("{0} is not a member of the network")]
    UnknownNode(NodeId),

    /// A member was listed twice.
    #[error("{0} is listed more than once")]
    DuplicateMember(NodeId),

    /// An edge connects a node to itself.
    #[error("self-loop on {0}")]
    SelfLoop(NodeId),

    /// A member id does not fit in a [`NodeSet`].
    #[error("{0} exceeds the supported membership capacity of {max}", max = NodeSet::CAPACITY)]
    OutOfRange(NodeId),

    /// The requested shape cannot be built with this many nodes.
    #[error("invalid shape: {0}")]
    InvalidShape(String),
}

/// Undirected communication graph over a fixed membership.
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    members: Vec<NodeId>,
    member_set: NodeSet,
    adjacency: BTreeMap<NodeId, NodeSet>,
}

impl NetworkGraph {
    /// Build a graph from an explicit membership and undirected edge list.
    pub fn new(
        members: impl IntoIterator<Item = NodeId>,
        edges: impl IntoIterator<Item = (NodeId, NodeId)>,
    ) -> Result<Self, TopologyError> {
        let mut member_list = Vec::new();
        let mut member_set = NodeSet::new();
        for node in members {
            if !NodeSet::can_hold(node) {
                return Err(TopologyError::OutOfRange(node));
            }
            if !member_set.insert(node) {
                return Err(TopologyError::DuplicateMember(node));
            }
            member_list.push(node);
        }
        member_list.sort();

        let mut adjacency: BTreeMap<NodeId, NodeSet> =
            member_list.iter().map(|&n| (n, NodeSet::new())).collect();

        for (a, b) in edges {
            if a == b {
                return Err(TopologyError::SelfLoop(a));
            }
            for node in [a, b] {
                if !member_set.contains(node) {
                    return Err(TopologyError::UnknownNode(node));
                }
            }
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }

        Ok(Self {
            members: member_list,
            member_set,
            adjacency,
        })
    }

    /// Fully connected graph over nodes `0..n`.
    pub fn complete(n: u32) -> Result<Self, TopologyError> {
        let members = (0..n).map(NodeId);
        let edges = (0..n).flat_map(|a| ((a + 1)..n).map(move |b| (NodeId(a), NodeId(b))));
        Self::new(members, edges)
    }

    /// Ring lattice over nodes `0..n`: every node is linked to its `k`
    /// nearest neighbours on each side.
    ///
    /// For `2k < n` this graph has vertex connectivity `2k`.
    pub fn ring_lattice(n: u32, k: u32) -> Result<Self, TopologyError> {
        if k == 0 || 2 * k >= n {
            return Err(TopologyError::InvalidShape(format!(
                "ring lattice needs 0 < 2k < n (n={n}, k={k})"
            )));
        }
        let members = (0..n).map(NodeId);
        let edges = (0..n).flat_map(|a| (1..=k).map(move |d| (NodeId(a), NodeId((a + d) % n))));
        Self::new(members, edges)
    }

    /// All members in ascending id order.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// Membership as a set.
    pub fn member_set(&self) -> &NodeSet {
        &self.member_set
    }

    /// Check membership.
    pub fn contains(&self, node: NodeId) -> bool {
        self.member_set.contains(node)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the graph has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Neighbours of `node` (empty for non-members).
    pub fn neighbours(&self, node: NodeId) -> NodeSet {
        self.adjacency.get(&node).copied().unwrap_or_default()
    }

    /// Check if two nodes share a direct link.
    pub fn are_adjacent(&self, a: NodeId, b: NodeId) -> bool {
        self.neighbours(a).contains(b)
    }

    /// Maximum number of internally node-disjoint paths between `source` and
    /// `target` (a direct link counts as one path).
    ///
    /// Computed as a unit-capacity max flow on the vertex-split graph, so the
    /// cost is `O(k * V^2)` for `k` paths.
    pub fn disjoint_paths_between(&self, source: NodeId, target: NodeId) -> usize {
        let (Some(s), Some(t)) = (self.position(source), self.position(target)) else {
            return 0;
        };
        if s == t {
            return 0;
        }

        // Node i splits into in = 2i and out = 2i + 1.
        let m = self.members.len();
        let size = 2 * m;
        let unbounded = m as i32;
        let mut capacity = vec![vec![0i32; size]; size];
        for i in 0..m {
            capacity[2 * i][2 * i + 1] = if i == s || i == t { unbounded } else { 1 };
        }
        for (i, &node) in self.members.iter().enumerate() {
            for neighbour in self.neighbours(node).iter() {
                if let Some(j) = self.position(neighbour) {
                    capacity[2 * i + 1][2 * j] = 1;
                }
            }
        }

        let source_vertex = 2 * s + 1;
        let sink_vertex = 2 * t;
        let mut flow = 0;
        loop {
            let mut parent = vec![usize::MAX; size];
            parent[source_vertex] = source_vertex;
            let mut queue = VecDeque::from([source_vertex]);
            while let Some(u) = queue.pop_front() {
                if u == sink_vertex {
                    break;
                }
                for v in 0..size {
                    if parent[v] == usize::MAX && capacity[u][v] > 0 {
                        parent[v] = u;
                        queue.push_back(v);
                    }
                }
            }
            if parent[sink_vertex] == usize::MAX {
                break;
            }
            // Every augmenting path carries exactly one unit.
            let mut v = sink_vertex;
            while v != source_vertex {
                let u = parent[v];
                capacity[u][v] -= 1;
                capacity[v][u] += 1;
                v = u;
            }
            flow += 1;
        }
        flow
    }

    /// The member pair with the fewest disjoint paths between them.
    ///
    /// Returns `None` for graphs with fewer than two members.
    pub fn weakest_pair(&self) -> Option<(NodeId, NodeId, usize)> {
        let mut weakest: Option<(NodeId, NodeId, usize)> = None;
        for (i, &a) in self.members.iter().enumerate() {
            for &b in &self.members[i + 1..] {
                let paths = self.disjoint_paths_between(a, b);
                if weakest.map_or(true, |(_, _, w)| paths < w) {
                    weakest = Some((a, b, paths));
                }
            }
        }
        weakest
    }

    /// Vertex connectivity in the Menger sense (minimum disjoint paths over
    /// all member pairs).
    pub fn connectivity(&self) -> Option<usize> {
        self.weakest_pair().map(|(_, _, paths)| paths)
    }

    /// Check that every member pair is joined by at least `2f + 1` disjoint paths.
    pub fn supports_fault_tolerance(&self, f: usize) -> bool {
        self.connectivity().is_some_and(|paths| paths > 2 * f)
    }

    fn position(&self, node: NodeId) -> Option<usize> {
        self.members.binary_search(&node).ok()
    }
}

/// A node's view of the network.
pub trait Topology: Send + Sync {
    /// Get the local node's ID.
    fn local_node_id(&self) -> NodeId;

    /// Get the shared communication graph.
    fn graph(&self) -> &NetworkGraph;

    // Derived methods

    /// All members in ascending id order.
    fn members(&self) -> &[NodeId] {
        self.graph().members()
    }

    /// Number of members.
    fn num_members(&self) -> usize {
        self.graph().len()
    }

    /// Check membership.
    fn is_member(&self, node: NodeId) -> bool {
        self.graph().contains(node)
    }

    /// Direct neighbours of the local node.
    fn peers(&self) -> NodeSet {
        self.graph().neighbours(self.local_node_id())
    }

    /// Check if `node` is a direct neighbour of the local node.
    fn is_peer(&self, node: NodeId) -> bool {
        self.peers().contains(node)
    }
}

/// A static topology implementation.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    local_node_id: NodeId,
    graph: Arc<NetworkGraph>,
}

impl StaticTopology {
    /// Create the view of `graph` held by `local_node_id`.
    pub fn new(local_node_id: NodeId, graph: Arc<NetworkGraph>) -> Result<Self, TopologyError> {
        if !graph.contains(local_node_id) {
            return Err(TopologyError::UnknownNode(local_node_id));
        }
        Ok(Self {
            local_node_id,
            graph,
        })
    }

    /// Create a topology as an Arc.
    pub fn into_arc(self) -> Arc<dyn Topology> {
        Arc::new(self)
    }
}

impl Topology for StaticTopology {
    fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    fn graph(&self) -> &NetworkGraph {
        &self.graph
    }
}
