//! Deterministic simulation runner.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use dolev_core::{Action, Event, OutboundMessage, RequestId, StateMachine, TimerId};
use dolev_node::{NodeBehavior, NodeConfig, NodeConfigError, NodeStateMachine};
use dolev_types::{MessageId, NetworkGraph, NodeId, Payload, StaticTopology, TopologyError};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Errors raised while setting up a simulation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] NodeConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Simulated members must be exactly `0..n`.
    #[error("simulated membership must be 0..n, found {0}")]
    SparseMembership(NodeId),

    #[error("{0} is not part of the simulation")]
    UnknownNode(NodeId),
}

/// One local delivery, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub time: Duration,
    pub node: NodeId,
    pub id: MessageId,
    pub payload: Payload,
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed by priority.
    pub events_by_priority: [u64; 3],
    /// Events discarded because their node had terminated.
    pub events_after_termination: u64,
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages sent (successfully scheduled for delivery).
    pub messages_sent: u64,
    /// Messages dropped due to network partition.
    pub messages_dropped_partition: u64,
    /// Messages dropped due to packet loss.
    pub messages_dropped_loss: u64,
    /// Messages addressed to a node with no direct link from the sender.
    pub messages_dropped_no_link: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
    /// Local deliveries across all nodes.
    pub deliveries: u64,
    /// Nodes that stopped on inactivity.
    pub terminations: u64,
}

impl SimulationStats {
    /// Total messages dropped (partition + packet loss + missing link).
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss + self.messages_dropped_no_link
    }

    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped();
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions.
/// Given the same seed, produces identical results every run.
pub struct SimulationRunner {
    /// All nodes in the simulation, indexed by NodeIndex.
    nodes: Vec<NodeStateMachine>,

    /// Global event queue, ordered deterministically.
    event_queue: BTreeMap<EventKey, Event>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    /// Network simulator.
    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Timer registry for cancellation support.
    /// Maps (node, timer_id) -> event_key for removal.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    /// Upper bound of the random delay added to every send.
    max_relay_delay: Duration,

    /// Per-node termination time.
    terminated_at: Vec<Option<Duration>>,

    /// Every local delivery, in order.
    deliveries: Vec<DeliveryRecord>,

    /// Acknowledged client submissions.
    accepted: HashMap<RequestId, MessageId>,

    next_request_id: u64,

    started: bool,

    /// Statistics.
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a runner with every node behaving correctly.
    ///
    /// The graph must use the dense membership `0..n`. The topology is checked
    /// against `config.broadcast.fault_tolerance` once, up front.
    pub fn new(
        graph: NetworkGraph,
        config: NodeConfig,
        network_config: NetworkConfig,
        seed: u64,
    ) -> Result<Self, SimulationError> {
        Self::with_behaviors(graph, config, network_config, &BTreeMap::new(), seed)
    }

    /// Create a runner where the nodes in `behaviors` deviate from the default.
    pub fn with_behaviors(
        graph: NetworkGraph,
        config: NodeConfig,
        network_config: NetworkConfig,
        behaviors: &BTreeMap<NodeId, NodeBehavior>,
        seed: u64,
    ) -> Result<Self, SimulationError> {
        for (index, &member) in graph.members().iter().enumerate() {
            if member.index() != index {
                return Err(SimulationError::SparseMembership(member));
            }
        }
        if let Some(&node) = behaviors.keys().find(|n| !graph.contains(**n)) {
            return Err(SimulationError::UnknownNode(node));
        }
        config.validate()?;
        config.check_topology(&graph)?;

        let graph = Arc::new(graph);
        let nodes = graph
            .members()
            .iter()
            .map(|&node| -> Result<NodeStateMachine, SimulationError> {
                let topology = StaticTopology::new(node, graph.clone())?.into_arc();
                let behavior = behaviors.get(&node).copied().unwrap_or_default();
                Ok(NodeStateMachine::new(topology, config.clone(), behavior)?)
            })
            .collect::<Result<Vec<_>, SimulationError>>()?;

        info!(
            num_nodes = nodes.len(),
            fault_tolerance = config.broadcast.fault_tolerance,
            byzantine = behaviors
                .values()
                .filter(|b| matches!(b, NodeBehavior::Byzantine(_)))
                .count(),
            seed,
            "Created simulation runner"
        );

        Ok(Self {
            terminated_at: vec![None; nodes.len()],
            nodes,
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(network_config, graph),
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: HashMap::new(),
            max_relay_delay: config.max_relay_delay,
            deliveries: Vec::new(),
            accepted: HashMap::new(),
            next_request_id: 0,
            started: false,
            stats: SimulationStats::default(),
        })
    }

    /// Get simulation statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Get current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Get a reference to a node by index.
    pub fn node(&self, index: NodeIndex) -> Option<&NodeStateMachine> {
        self.nodes.get(index as usize)
    }

    pub fn nodes(&self) -> &[NodeStateMachine] {
        &self.nodes
    }

    /// Get a reference to the network.
    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    /// Get a mutable reference to the network for partition/loss configuration.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Every local delivery so far, in processing order.
    pub fn deliveries(&self) -> &[DeliveryRecord] {
        &self.deliveries
    }

    /// Nodes that delivered `id`, in delivery order.
    pub fn delivered_by(&self, id: MessageId) -> Vec<NodeId> {
        self.deliveries
            .iter()
            .filter(|d| d.id == id)
            .map(|d| d.node)
            .collect()
    }

    /// The message id assigned to a client submission, once processed.
    pub fn accepted_id(&self, request_id: RequestId) -> Option<MessageId> {
        self.accepted.get(&request_id).copied()
    }

    /// When `node` stopped on inactivity, if it did.
    pub fn terminated_at(&self, node: NodeIndex) -> Option<Duration> {
        self.terminated_at.get(node as usize).copied().flatten()
    }

    pub fn all_terminated(&self) -> bool {
        self.terminated_at.iter().all(Option::is_some)
    }

    /// Number of events still queued.
    pub fn pending_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Arm every node's timers. Runs at most once; later calls are no-ops.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            node.set_time(self.now);
            let actions = node.start();
            self.process_actions(index as NodeIndex, actions);
        }
    }

    /// Originate a broadcast at `node` right now, bypassing the event queue.
    pub fn broadcast(&mut self, node: NodeIndex, payload: Payload) -> Result<MessageId, SimulationError> {
        self.start();
        let now = self.now;
        let sm = self
            .nodes
            .get_mut(node as usize)
            .ok_or(SimulationError::UnknownNode(NodeId(node)))?;
        sm.set_time(now);
        let (id, actions) = sm.broadcast(payload);
        self.process_actions(node, actions);
        Ok(id)
    }

    /// Queue a client submission for `node` after `delay`.
    pub fn submit_broadcast(
        &mut self,
        node: NodeIndex,
        delay: Duration,
        payload: Payload,
    ) -> Result<RequestId, SimulationError> {
        if node as usize >= self.nodes.len() {
            return Err(SimulationError::UnknownNode(NodeId(node)));
        }
        let request_id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        let time = self.now + delay;
        self.schedule_event(
            node,
            time,
            Event::SubmitBroadcast {
                payload,
                request_id,
            },
        );
        Ok(request_id)
    }

    /// Run simulation until no more events or time limit reached.
    pub fn run_until(&mut self, end_time: Duration) {
        self.start();
        trace!(
            end_time_secs = end_time.as_secs_f64(),
            "Running simulation step"
        );

        while let Some((key, event)) = self.event_queue.pop_first() {
            if key.time > end_time {
                // Not due yet; put it back.
                self.event_queue.insert(key, event);
                debug!(
                    remaining_events = self.event_queue.len(),
                    "Time limit reached"
                );
                break;
            }

            self.now = key.time;
            let node_index = key.node_index;

            if self.terminated_at[node_index as usize].is_some() {
                self.stats.events_after_termination += 1;
                continue;
            }

            trace!(
                time = ?self.now,
                node = node_index,
                event = event.type_name(),
                "Processing event"
            );

            // Update stats
            self.stats.events_processed += 1;
            self.stats.events_by_priority[event.priority() as usize] += 1;

            // Update node's time and process event
            let node = &mut self.nodes[node_index as usize];
            node.set_time(self.now);
            let actions = node.handle(event);

            self.process_actions(node_index, actions);
        }

        trace!(
            events_processed = self.stats.events_processed,
            actions_generated = self.stats.actions_generated,
            final_time = ?self.now,
            "Simulation step complete"
        );
    }

    fn process_actions(&mut self, from: NodeIndex, actions: Vec<Action>) {
        self.stats.actions_generated += actions.len() as u64;
        for action in actions {
            self.process_action(from, action);
        }
    }

    /// Process an action from a node.
    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::SendTo { to, message } => {
                let event = Self::message_to_event(NodeId(from), message);
                self.try_deliver_message(from, to, event);
            }

            Action::SetTimer { id, duration } => {
                if let Some(old) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&old);
                }
                let fire_time = self.now + duration;
                let event = Self::timer_to_event(id);
                let key = self.schedule_event(from, fire_time, event);
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                }
            }

            Action::EmitDelivered { id, payload } => {
                self.stats.deliveries += 1;
                self.deliveries.push(DeliveryRecord {
                    time: self.now,
                    node: NodeId(from),
                    id,
                    payload,
                });
            }

            Action::EmitBroadcastAccepted { request_id, id } => {
                self.accepted.insert(request_id, id);
            }

            Action::Terminate { idle_for } => {
                info!(node = from, idle_for = ?idle_for, time = ?self.now, "Node terminated");
                self.terminated_at[from as usize] = Some(self.now);
                self.stats.terminations += 1;
                self.timers.retain(|(node, _), _| *node != from);
            }
        }
    }

    /// Schedule an event.
    fn schedule_event(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey::new(time, &event, node, self.sequence);
        self.event_queue.insert(key, event);
        key
    }

    /// Try to deliver a message, accounting for links, partitions and packet loss.
    /// Updates stats based on delivery outcome.
    fn try_deliver_message(&mut self, from: NodeIndex, to: NodeId, event: Event) {
        let sender = NodeId(from);
        if !self.network.is_linked(sender, to) {
            self.stats.messages_dropped_no_link += 1;
            warn!(from = from, to = to.0, "Send to a node without a direct link");
            return;
        }

        // Check partition first (deterministic - doesn't consume RNG)
        if self.network.is_partitioned(sender, to) {
            self.stats.messages_dropped_partition += 1;
            trace!(from = from, to = to.0, "Message dropped due to partition");
            return;
        }

        // Check packet loss (probabilistic but deterministic with seeded RNG)
        if self.network.should_drop_packet(&mut self.rng) {
            self.stats.messages_dropped_loss += 1;
            trace!(from = from, to = to.0, "Message dropped due to packet loss");
            return;
        }

        // Message will be delivered - sample latency and relay jitter, then schedule
        let latency = self.network.sample_latency(&mut self.rng);
        let jitter = SimulatedNetwork::sample_relay_delay(self.max_relay_delay, &mut self.rng);
        let delivery_time = self.now + latency + jitter;
        self.schedule_event(to.0, delivery_time, event);
        self.stats.messages_sent += 1;
    }

    /// Convert an outbound message to an inbound event.
    ///
    /// The sender is stamped by the runner, standing in for an authenticated link.
    fn message_to_event(from: NodeId, message: OutboundMessage) -> Event {
        match message {
            OutboundMessage::Broadcast(gossip) => Event::BroadcastReceived { from, gossip },
        }
    }

    /// Convert a timer ID to an event.
    fn timer_to_event(id: TimerId) -> Event {
        match id {
            TimerId::Liveness => Event::LivenessTimer,
        }
    }
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("nodes", &self.nodes.len())
            .field("now", &self.now)
            .field("pending_events", &self.event_queue.len())
            .field("stats", &self.stats)
            .finish()
    }
}
