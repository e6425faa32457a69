//! Node configuration and start-up checks.

use dolev_broadcast::{AdversaryMode, BroadcastConfig, BroadcastConfigError};
use dolev_liveness::{LivenessConfig, LivenessConfigError};
use dolev_types::{NetworkGraph, NodeId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Errors that prevent a node from starting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeConfigError {
    #[error("broadcast config: {0}")]
    Broadcast(#[from] BroadcastConfigError),

    #[error("liveness config: {0}")]
    Liveness(#[from] LivenessConfigError),

    /// Some pair of members is joined by fewer than `2f + 1` disjoint paths.
    #[error(
        "{a} and {b} are joined by {paths} disjoint paths, f = {fault_tolerance} needs {required}"
    )]
    InsufficientConnectivity {
        a: NodeId,
        b: NodeId,
        paths: usize,
        fault_tolerance: usize,
        required: usize,
    },

    #[error("network needs at least 2 members, got {0}")]
    TooFewMembers(usize),
}

/// What to do when the topology cannot support the configured `f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyCheck {
    /// Refuse to start.
    #[default]
    Enforce,
    /// Log a warning and run anyway.
    Warn,
}

/// How a node behaves in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeBehavior {
    #[default]
    Correct,
    Byzantine(AdversaryMode),
}

/// Node configuration shared by every node of a run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub broadcast: BroadcastConfig,

    pub liveness: LivenessConfig,

    /// Upper bound of the random delay the runner adds to each send.
    pub max_relay_delay: Duration,

    pub topology_check: TopologyCheck,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fault tolerance `f`.
    pub fn with_fault_tolerance(mut self, f: usize) -> Self {
        self.broadcast.fault_tolerance = f;
        self
    }

    pub fn with_broadcast(mut self, broadcast: BroadcastConfig) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn with_liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = liveness;
        self
    }

    /// Set the relay jitter bound.
    pub fn with_max_relay_delay(mut self, delay: Duration) -> Self {
        self.max_relay_delay = delay;
        self
    }

    pub fn with_topology_check(mut self, check: TopologyCheck) -> Self {
        self.topology_check = check;
        self
    }

    /// Check the component configs.
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        self.broadcast.validate()?;
        self.liveness.validate()?;
        Ok(())
    }

    /// Check that `graph` can carry `f` Byzantine faults: every member pair
    /// must be joined by at least `2f + 1` internally node-disjoint paths.
    ///
    /// Under [`TopologyCheck::Warn`] a shortfall is logged instead of returned.
    pub fn check_topology(&self, graph: &NetworkGraph) -> Result<(), NodeConfigError> {
        let f = self.broadcast.fault_tolerance;
        let required = 2 * f + 1;
        let Some((a, b, paths)) = graph.weakest_pair() else {
            return Err(NodeConfigError::TooFewMembers(graph.len()));
        };
        if paths >= required {
            return Ok(());
        }

        let err = NodeConfigError::InsufficientConnectivity {
            a,
            b,
            paths,
            fault_tolerance: f,
            required,
        };
        match self.topology_check {
            TopologyCheck::Enforce => Err(err),
            TopologyCheck::Warn => {
                warn!(
                    a = a.0,
                    b = b.0,
                    paths,
                    required,
                    "Topology cannot guarantee delivery with this fault tolerance"
                );
                Ok(())
            }
        }
    }
}
