//! Configuration types for the simulator.

use dolev_broadcast::AdversaryMode;
use dolev_node::NodeConfig;
use dolev_simulation::NetworkConfig;
use dolev_types::{NetworkGraph, TopologyError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of the communication graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyKind {
    /// Every node linked to every other.
    #[default]
    Complete,

    /// Circulant graph: each node linked to the `k` nearest on either side
    /// of a ring (degree `2k`).
    RingLattice { k: u32 },
}

impl TopologyKind {
    /// Build the graph over members `0..num_nodes`.
    pub fn build(self, num_nodes: u32) -> Result<NetworkGraph, TopologyError> {
        match self {
            TopologyKind::Complete => NetworkGraph::complete(num_nodes),
            TopologyKind::RingLattice { k } => NetworkGraph::ring_lattice(num_nodes, k),
        }
    }

    pub fn label(self) -> String {
        match self {
            TopologyKind::Complete => "complete".to_string(),
            TopologyKind::RingLattice { k } => format!("ring-lattice(k={k})"),
        }
    }
}

/// Which node originates each broadcast of the workload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OriginSelection {
    /// Always the same node.
    Fixed { node: u32 },

    /// Cycle through the correct nodes in id order.
    #[default]
    RoundRobin,

    /// A uniformly random correct node, drawn from the seeded RNG.
    Random,
}

/// Broadcasts submitted during a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of broadcasts.
    pub broadcasts: usize,

    /// Simulated time between consecutive submissions.
    pub interval: Duration,

    pub origin: OriginSelection,

    /// Payload text. With more than one broadcast, each gets a `-<n>` suffix.
    pub payload: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            broadcasts: 1,
            interval: Duration::from_millis(100),
            origin: OriginSelection::Fixed { node: 0 },
            payload: "hello".to_string(),
        }
    }
}

impl WorkloadConfig {
    /// A single broadcast of `payload` from `node`.
    pub fn single(node: u32, payload: impl Into<String>) -> Self {
        Self {
            origin: OriginSelection::Fixed { node },
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_broadcasts(mut self, broadcasts: usize) -> Self {
        self.broadcasts = broadcasts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_origin(mut self, origin: OriginSelection) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// Configuration for a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Number of nodes; members are `0..num_nodes`.
    pub num_nodes: u32,

    pub topology: TopologyKind,

    /// Shared node settings: fault tolerance, relay jitter, liveness.
    pub node: NodeConfig,

    pub network: NetworkConfig,

    /// Nodes that run the adversarial behaviour.
    pub byzantine: Vec<u32>,

    /// Behaviour of every Byzantine node.
    pub adversary: AdversaryMode,

    pub workload: WorkloadConfig,

    /// Random seed for deterministic simulation.
    pub seed: u64,

    /// Simulated time to run for.
    pub duration: Duration,
}

impl SimulatorConfig {
    /// Create a configuration for `num_nodes` fully connected nodes.
    pub fn new(num_nodes: u32) -> Self {
        Self {
            num_nodes,
            topology: TopologyKind::Complete,
            node: NodeConfig::default(),
            network: NetworkConfig::default(),
            byzantine: Vec::new(),
            adversary: AdversaryMode::default(),
            workload: WorkloadConfig::default(),
            seed: 42,
            duration: Duration::from_secs(3),
        }
    }

    pub fn with_topology(mut self, topology: TopologyKind) -> Self {
        self.topology = topology;
        self
    }

    /// Set the fault tolerance `f`.
    pub fn with_fault_tolerance(mut self, f: usize) -> Self {
        self.node = self.node.with_fault_tolerance(f);
        self
    }

    pub fn with_node_config(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Mark `nodes` as Byzantine, all running `mode`.
    pub fn with_byzantine(mut self, nodes: impl IntoIterator<Item = u32>, mode: AdversaryMode) -> Self {
        self.byzantine = nodes.into_iter().collect();
        self.adversary = mode;
        self
    }

    pub fn with_workload(mut self, workload: WorkloadConfig) -> Self {
        self.workload = workload;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_byzantine(&self, node: u32) -> bool {
        self.byzantine.contains(&node)
    }

    /// Members that follow the protocol, in id order.
    pub fn correct_nodes(&self) -> Vec<u32> {
        (0..self.num_nodes).filter(|n| !self.is_byzantine(*n)).collect()
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "num_nodes": 8,
            "topology": { "kind": "ring_lattice", "k": 2 },
            "byzantine": [3],
            "adversary": "forge",
            "workload": { "broadcasts": 4, "origin": { "kind": "random" } }
        }"#;
        let config: SimulatorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.num_nodes, 8);
        assert_eq!(config.topology, TopologyKind::RingLattice { k: 2 });
        assert_eq!(config.adversary, AdversaryMode::Forge);
        assert_eq!(config.workload.broadcasts, 4);
        assert_eq!(config.workload.origin, OriginSelection::Random);
        assert_eq!(config.workload.payload, "hello");
        assert_eq!(config.seed, 42);
        assert_eq!(config.node.broadcast.fault_tolerance, 1);
    }

    #[test]
    fn test_correct_nodes() {
        let config = SimulatorConfig::new(5).with_byzantine([1, 3], AdversaryMode::Silent);
        assert_eq!(config.correct_nodes(), vec![0, 2, 4]);
        assert!(config.is_byzantine(3));
    }

    #[test]
    fn test_topology_build() {
        assert_eq!(TopologyKind::Complete.build(4).unwrap().len(), 4);
        let ring = TopologyKind::RingLattice { k: 2 }.build(8).unwrap();
        assert_eq!(ring.connectivity(), Some(4));
        assert_eq!(TopologyKind::RingLattice { k: 2 }.label(), "ring-lattice(k=2)");
    }
}
