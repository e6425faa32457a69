//! Simulated network with deterministic latency, packet loss, and partitions.

use dolev_types::{NetworkGraph, NodeId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Base one-hop latency.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this probability.
    pub packet_loss_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
        }
    }
}

/// Simulated network for deterministic message delivery.
///
/// Supports:
/// - Links only where the communication graph has an edge
/// - Configurable latency with jitter
/// - Packet loss (probabilistic message drops)
/// - Network partitions (blocking communication between node pairs)
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    graph: Arc<NetworkGraph>,
    /// Partitioned node pairs. If (a, b) is in this set, messages from a to b are dropped.
    /// Partitions are directional - add both (a, b) and (b, a) for bidirectional partition.
    partitions: HashSet<(NodeId, NodeId)>,
}

impl SimulatedNetwork {
    /// Create a new simulated network over `graph`.
    pub fn new(config: NetworkConfig, graph: Arc<NetworkGraph>) -> Self {
        Self {
            config,
            graph,
            partitions: HashSet::new(),
        }
    }

    /// Check whether the graph has a direct link between the two nodes.
    pub fn is_linked(&self, from: NodeId, to: NodeId) -> bool {
        self.graph.are_adjacent(from, to)
    }

    // ─── Partition Management ───

    /// Check if two nodes are partitioned (message from `from` to `to` would be dropped).
    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions.contains(&(from, to))
    }

    /// Create a unidirectional partition: messages from `from` to `to` are dropped.
    pub fn partition_unidirectional(&mut self, from: NodeId, to: NodeId) {
        self.partitions.insert((from, to));
    }

    /// Create a bidirectional partition between two nodes.
    pub fn partition_bidirectional(&mut self, a: NodeId, b: NodeId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Isolate a node from all other nodes in the network.
    pub fn isolate_node(&mut self, node: NodeId) {
        let members: Vec<NodeId> = self.graph.members().to_vec();
        for other in members {
            if other != node {
                self.partition_bidirectional(node, other);
            }
        }
    }

    /// Heal all partitions - restore full network connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    /// Get the number of active partition pairs.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    // ─── Packet Loss ───

    /// Check if a packet should be dropped based on the configured loss rate.
    /// Returns true if the packet should be dropped.
    pub fn should_drop_packet(&self, rng: &mut ChaCha8Rng) -> bool {
        self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate
    }

    /// Set the packet loss rate (0.0 - 1.0).
    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.config.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    pub fn packet_loss_rate(&self) -> f64 {
        self.config.packet_loss_rate
    }

    // ─── Latency ───

    /// Sample one-hop latency: base latency plus symmetric jitter, at least 1ms.
    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.latency.as_secs_f64();
        let jitter_range = base * self.config.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.001))
    }

    /// Sample a relay delay uniformly from `[0, max]`.
    pub fn sample_relay_delay(max: Duration, rng: &mut ChaCha8Rng) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let nanos = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rng.gen_range(0..=nanos))
    }

    pub fn graph(&self) -> &Arc<NetworkGraph> {
        &self.graph
    }

    /// Get network configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn network(config: NetworkConfig) -> SimulatedNetwork {
        SimulatedNetwork::new(config, Arc::new(NetworkGraph::ring_lattice(6, 1).unwrap()))
    }

    #[test]
    fn test_links_follow_graph() {
        let net = network(NetworkConfig::default());
        assert!(net.is_linked(NodeId(0), NodeId(1)));
        assert!(net.is_linked(NodeId(0), NodeId(5)));
        assert!(!net.is_linked(NodeId(0), NodeId(3)));
    }

    #[test]
    fn test_latency_is_deterministic_and_bounded() {
        let net = network(NetworkConfig::default());
        let mut rng1 = ChaCha8Rng::seed_from_u64(42);
        let mut rng2 = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..100 {
            let a = net.sample_latency(&mut rng1);
            let b = net.sample_latency(&mut rng2);
            assert_eq!(a, b, "Same seed should produce same latency");
            assert!(a > Duration::from_millis(8) && a < Duration::from_millis(12));
        }
    }

    #[test]
    fn test_relay_delay_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(
            SimulatedNetwork::sample_relay_delay(Duration::ZERO, &mut rng),
            Duration::ZERO
        );
        for _ in 0..100 {
            let delay = SimulatedNetwork::sample_relay_delay(Duration::from_millis(50), &mut rng);
            assert!(delay <= Duration::from_millis(50));
        }
    }

    // ─── Partition Tests ───

    #[test]
    fn test_unidirectional_partition() {
        let mut net = network(NetworkConfig::default());
        net.partition_unidirectional(NodeId(0), NodeId(1));
        assert!(net.is_partitioned(NodeId(0), NodeId(1)));
        assert!(!net.is_partitioned(NodeId(1), NodeId(0)));
    }

    #[test]
    fn test_isolate_and_heal() {
        let mut net = network(NetworkConfig::default());
        net.isolate_node(NodeId(2));
        assert_eq!(net.partition_count(), 10);
        assert!(net.is_partitioned(NodeId(2), NodeId(4)));
        assert!(net.is_partitioned(NodeId(4), NodeId(2)));

        net.heal_all();
        assert_eq!(net.partition_count(), 0);
    }

    #[test]
    fn test_packet_loss() {
        let mut net = network(NetworkConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(!(0..100).any(|_| net.should_drop_packet(&mut rng)));

        net.set_packet_loss_rate(1.5);
        assert_eq!(net.packet_loss_rate(), 1.0);
        assert!((0..100).all(|_| net.should_drop_packet(&mut rng)));
    }
}
