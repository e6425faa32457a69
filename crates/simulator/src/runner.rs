//! Simulator that drives a broadcast workload through the simulation runner.

use crate::config::{OriginSelection, SimulatorConfig};
use crate::metrics::{ids, BroadcastOutcome, MetricsCollector, SimulationReport};
use crate::workload::{BroadcastWorkload, PlannedBroadcast};
use dolev_core::RequestId;
use dolev_node::NodeBehavior;
use dolev_simulation::{SimulationError, SimulationRunner};
use dolev_types::{NodeId, TopologyError};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// Offset mixed into the seed for workload planning, so origin choice does
/// not share a stream with network conditions.
const WORKLOAD_SEED_OFFSET: u64 = 0x5eed;

/// Errors raised while setting up a simulation.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("simulation setup failed: {0}")]
    Simulation(#[from] SimulationError),

    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("{0} is not part of the network")]
    UnknownNode(NodeId),

    #[error("origin {0} is configured as Byzantine")]
    ByzantineOrigin(NodeId),

    #[error("every node is Byzantine")]
    NoCorrectNodes,

    #[error("metrics setup failed: {0}")]
    Metrics(String),
}

/// Runs one broadcast scenario and reports what every correct node delivered.
///
/// Deterministic: the same config (seed included) yields the same report.
pub struct Simulator {
    config: SimulatorConfig,
    runner: SimulationRunner,
    /// Submitted broadcasts with the request id each was queued under.
    plan: Vec<(RequestId, PlannedBroadcast)>,
    correct: Vec<NodeId>,
    connectivity: Option<usize>,
}

impl Simulator {
    /// Build the network and queue the workload.
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        let graph = config.topology.build(config.num_nodes)?;

        if let Some(&node) = config.byzantine.iter().find(|n| **n >= config.num_nodes) {
            return Err(SimulatorError::UnknownNode(NodeId(node)));
        }
        let correct: Vec<NodeId> = config.correct_nodes().into_iter().map(NodeId).collect();
        if correct.is_empty() {
            return Err(SimulatorError::NoCorrectNodes);
        }
        if let OriginSelection::Fixed { node } = config.workload.origin {
            if node >= config.num_nodes {
                return Err(SimulatorError::UnknownNode(NodeId(node)));
            }
            if config.is_byzantine(node) {
                return Err(SimulatorError::ByzantineOrigin(NodeId(node)));
            }
        }

        let connectivity = graph.connectivity();
        let behaviors: BTreeMap<NodeId, NodeBehavior> = config
            .byzantine
            .iter()
            .map(|&n| (NodeId(n), NodeBehavior::Byzantine(config.adversary)))
            .collect();

        let mut runner = SimulationRunner::with_behaviors(
            graph,
            config.node.clone(),
            config.network.clone(),
            &behaviors,
            config.seed,
        )?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(WORKLOAD_SEED_OFFSET));
        let plan = BroadcastWorkload::new(config.workload.clone())
            .plan(&correct, &mut rng)
            .into_iter()
            .map(|planned| -> Result<_, SimulatorError> {
                let request_id =
                    runner.submit_broadcast(planned.origin.0, planned.at, planned.payload.clone())?;
                Ok((request_id, planned))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            num_nodes = config.num_nodes,
            topology = %config.topology.label(),
            connectivity = ?connectivity,
            fault_tolerance = config.node.broadcast.fault_tolerance,
            byzantine = ?config.byzantine,
            broadcasts = plan.len(),
            seed = config.seed,
            "Simulator ready"
        );

        Ok(Self {
            config,
            runner,
            plan,
            correct,
            connectivity,
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// The underlying runner, for per-node inspection.
    pub fn runner(&self) -> &SimulationRunner {
        &self.runner
    }

    pub fn plan(&self) -> impl Iterator<Item = &PlannedBroadcast> {
        self.plan.iter().map(|(_, planned)| planned)
    }

    /// Run for the configured duration and build the report.
    pub fn run(&mut self) -> Result<SimulationReport, SimulatorError> {
        self.runner.run_until(self.config.duration);
        let report = self.report()?;

        info!(
            completed = report.completed_broadcasts(),
            broadcasts = report.broadcasts.len(),
            deliveries = report.correct_deliveries,
            forged = report.forged_deliveries,
            events = report.events_processed,
            "Simulation finished"
        );
        Ok(report)
    }

    /// Report on the run so far.
    pub fn report(&self) -> Result<SimulationReport, SimulatorError> {
        let mut metrics =
            MetricsCollector::new().map_err(|e| SimulatorError::Metrics(e.to_string()))?;

        for (request_id, planned) in &self.plan {
            let id = self.runner.accepted_id(*request_id);
            let mut delivered = Vec::new();
            let mut forged = Vec::new();

            if let Some(id) = id {
                for record in self
                    .runner
                    .deliveries()
                    .iter()
                    .filter(|r| r.id == id && self.correct.contains(&r.node))
                {
                    if record.payload != planned.payload {
                        forged.push(record.node);
                        continue;
                    }
                    delivered.push(record.node);
                    if record.node != planned.origin {
                        metrics.record_latency(record.time.saturating_sub(planned.at));
                    }
                }
            }

            let missing: Vec<NodeId> = self
                .correct
                .iter()
                .filter(|n| !delivered.contains(n) && !forged.contains(n))
                .copied()
                .collect();

            metrics.record_outcome(
                BroadcastOutcome {
                    origin: planned.origin.0,
                    id: id.map(|id| id.to_string()),
                    payload: String::from_utf8_lossy(&planned.payload).into_owned(),
                    submitted_at_ms: planned.at.as_secs_f64() * 1000.0,
                    delivered_by: ids(delivered),
                    missing: ids(missing),
                    forged: ids(forged),
                },
                self.correct.len(),
            );
        }

        let stats = self.runner.stats();
        let adversary = if self.config.byzantine.is_empty() {
            "none".to_string()
        } else {
            self.config.adversary.label().to_string()
        };

        Ok(SimulationReport {
            num_nodes: self.config.num_nodes,
            topology: self.config.topology.label(),
            connectivity: self.connectivity,
            fault_tolerance: self.config.node.broadcast.fault_tolerance,
            byzantine: self.config.byzantine.clone(),
            adversary,
            seed: self.config.seed,
            simulated_time_ms: self.runner.now().as_secs_f64() * 1000.0,
            correct_deliveries: metrics.correct_deliveries(),
            expected_deliveries: metrics.expected_deliveries(),
            forged_deliveries: metrics.forged_deliveries(),
            latency: metrics.latency_summary(),
            broadcasts: metrics.into_outcomes(),
            events_processed: stats.events_processed,
            messages_sent: stats.messages_sent,
            messages_dropped: stats.messages_dropped(),
            terminated_nodes: (0..self.config.num_nodes)
                .filter(|&n| self.runner.terminated_at(n).is_some())
                .count(),
        })
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("num_nodes", &self.config.num_nodes)
            .field("broadcasts", &self.plan.len())
            .field("now", &self.runner.now())
            .finish()
    }
}
