//! Node state machine.

use crate::{NodeBehavior, NodeConfig, NodeConfigError};
use dolev_broadcast::{AdversarialNode, BroadcastProtocol, ReliableBroadcaster};
use dolev_core::{Action, Event, StateMachine};
use dolev_liveness::LivenessMonitor;
use dolev_types::{MessageId, NodeId, Payload, Topology};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Index type for simulation-only node routing.
pub type NodeIndex = u32;

/// Combined node state machine.
///
/// Composes a broadcast behaviour and the liveness monitor into a single
/// state machine. Every received relay counts as activity for the monitor.
pub struct NodeStateMachine {
    /// Network topology (single source of truth).
    topology: Arc<dyn Topology>,

    /// Correct or adversarial broadcast behaviour.
    protocol: Box<dyn BroadcastProtocol>,

    /// Inactivity detection.
    liveness: LivenessMonitor,

    config: NodeConfig,

    /// Current time.
    now: Duration,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("node", &self.topology.local_node_id())
            .field("protocol", &self.protocol)
            .field("terminated", &self.liveness.is_terminated())
            .field("now", &self.now)
            .finish()
    }
}

impl NodeStateMachine {
    /// Create a node for `topology.local_node_id()`.
    ///
    /// Only the component configs are validated here; the topology check is
    /// run once per network by the runner (see [`NodeConfig::check_topology`]).
    pub fn new(
        topology: Arc<dyn Topology>,
        config: NodeConfig,
        behavior: NodeBehavior,
    ) -> Result<Self, NodeConfigError> {
        config.validate()?;

        let protocol: Box<dyn BroadcastProtocol> = match behavior {
            NodeBehavior::Correct => Box::new(ReliableBroadcaster::new(
                topology.clone(),
                config.broadcast.clone(),
            )),
            NodeBehavior::Byzantine(mode) => Box::new(AdversarialNode::new(topology.clone(), mode)),
        };

        Ok(Self {
            liveness: LivenessMonitor::new(config.liveness.clone()),
            topology,
            protocol,
            config,
            now: Duration::ZERO,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.topology.local_node_id()
    }

    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn protocol(&self) -> &dyn BroadcastProtocol {
        self.protocol.as_ref()
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    /// Arm the node's timers. Called once by the runner before any event.
    pub fn start(&mut self) -> Vec<Action> {
        self.liveness.start()
    }

    /// Originate a broadcast directly, bypassing the client request path.
    pub fn broadcast(&mut self, payload: Payload) -> (MessageId, Vec<Action>) {
        self.protocol.broadcast(payload)
    }

    pub fn is_delivered(&self, id: &MessageId) -> bool {
        self.protocol.is_delivered(id)
    }

    pub fn delivered_payload(&self, id: &MessageId) -> Option<&Payload> {
        self.protocol.delivered_payload(id)
    }

    pub fn is_terminated(&self) -> bool {
        self.liveness.is_terminated()
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        trace!(node = self.node_id().0, event = event.type_name(), "Handling event");
        match event {
            Event::LivenessTimer => self.liveness.on_poll_timer(),

            Event::BroadcastReceived { from, gossip } => {
                self.liveness.record_activity();
                self.protocol.on_broadcast_received(from, gossip)
            }

            Event::SubmitBroadcast {
                payload,
                request_id,
            } => {
                let (id, mut actions) = self.protocol.broadcast(payload);
                actions.push(Action::EmitBroadcastAccepted { request_id, id });
                actions
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.liveness.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}
