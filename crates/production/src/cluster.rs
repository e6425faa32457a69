//! Spawn a whole network of nodes inside one process.

use crate::rate_limiter::RateLimitConfig;
use crate::runner::{
    NodeNotification, NodeRunner, PeerDirectory, RunnerError, RunnerExit,
};
use dolev_core::{Event, RequestId};
use dolev_node::{NodeBehavior, NodeConfig, NodeStateMachine};
use dolev_types::{MessageId, NetworkGraph, NodeId, Payload, StaticTopology};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Settings shared by every node of a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub node: NodeConfig,
    /// Bound on each node's inbox.
    pub inbox_capacity: usize,
    pub rate_limit: RateLimitConfig,
    /// Seed for relay jitter.
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            inbox_capacity: 1024,
            rate_limit: RateLimitConfig::default(),
            seed: 0,
        }
    }
}

impl ClusterConfig {
    pub fn new(node: NodeConfig) -> Self {
        Self {
            node,
            ..Self::default()
        }
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One tokio task per member, connected by in-memory channels along the
/// graph's edges.
pub struct LocalCluster {
    graph: Arc<NetworkGraph>,
    peers: Arc<PeerDirectory>,
    notifications: mpsc::UnboundedReceiver<NodeNotification>,
    /// Every notification received so far, in arrival order.
    log: Vec<NodeNotification>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<RunnerExit>>,
    next_request_id: u64,
}

impl LocalCluster {
    /// Spawn every member of `graph`. Nodes in `behaviors` deviate from the
    /// correct protocol.
    ///
    /// The topology is checked once against the configured fault tolerance.
    /// Must be called from inside a tokio runtime.
    pub fn spawn(
        graph: NetworkGraph,
        config: ClusterConfig,
        behaviors: &BTreeMap<NodeId, NodeBehavior>,
    ) -> Result<Self, RunnerError> {
        if let Some(&node) = behaviors.keys().find(|n| !graph.contains(**n)) {
            return Err(RunnerError::UnknownNode(node));
        }
        config.node.validate()?;
        config.node.check_topology(&graph)?;

        let graph = Arc::new(graph);
        let mut directory = PeerDirectory::new();
        let mut inboxes = Vec::with_capacity(graph.len());
        for &member in graph.members() {
            let (tx, rx) = mpsc::channel(config.inbox_capacity);
            directory.insert(member, tx);
            inboxes.push((member, rx));
        }
        let peers = Arc::new(directory);

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let mut runners = Vec::with_capacity(inboxes.len());
        for (member, inbox) in inboxes {
            let topology = StaticTopology::new(member, graph.clone())?.into_arc();
            let behavior = behaviors.get(&member).copied().unwrap_or_default();
            let state = NodeStateMachine::new(topology, config.node.clone(), behavior)?;
            runners.push(NodeRunner::new(
                state,
                inbox,
                peers.clone(),
                notify_tx.clone(),
                shutdown.child_token(),
                config.rate_limit.clone(),
                config.seed,
            ));
        }

        // Start only once every node is built so a config error spawns nothing.
        let handles = runners
            .into_iter()
            .map(|runner| tokio::spawn(runner.run()))
            .collect();

        info!(
            num_nodes = graph.len(),
            fault_tolerance = config.node.broadcast.fault_tolerance,
            byzantine = behaviors
                .values()
                .filter(|b| matches!(b, NodeBehavior::Byzantine(_)))
                .count(),
            "Spawned local cluster"
        );

        Ok(Self {
            graph,
            peers,
            notifications: notify_rx,
            log: Vec::new(),
            shutdown,
            handles,
            next_request_id: 0,
        })
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }

    /// Notifications received so far.
    pub fn notifications(&self) -> &[NodeNotification] {
        &self.log
    }

    /// Payloads delivered for `id`, by node, among notifications received so far.
    pub fn deliveries(&self, id: MessageId) -> BTreeMap<NodeId, Payload> {
        self.log
            .iter()
            .filter_map(|n| match n {
                NodeNotification::Delivered {
                    node,
                    id: delivered,
                    payload,
                } if *delivered == id => Some((*node, payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Queue a broadcast request at `node`.
    pub async fn submit(&mut self, node: NodeId, payload: Payload) -> Result<RequestId, RunnerError> {
        let inbox = self.peers.get(node).ok_or(RunnerError::UnknownNode(node))?;
        let request_id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;

        inbox
            .send(Event::SubmitBroadcast {
                payload,
                request_id,
            })
            .await
            .map_err(|_| RunnerError::ChannelClosed(node))?;
        Ok(request_id)
    }

    /// Submit a broadcast at `node` and wait until it is accepted.
    pub async fn broadcast(
        &mut self,
        node: NodeId,
        payload: Payload,
        timeout: Duration,
    ) -> Result<MessageId, RunnerError> {
        let request_id = self.submit(node, payload).await?;
        let found = |log: &[NodeNotification]| {
            log.iter().find_map(|n| match n {
                NodeNotification::BroadcastAccepted {
                    node: accepted_by,
                    request_id: accepted,
                    id,
                } if *accepted_by == node && *accepted == request_id => Some(*id),
                _ => None,
            })
        };
        self.wait_for(timeout, found).await
    }

    /// Wait until every node in `nodes` has delivered `id`.
    pub async fn await_delivery(
        &mut self,
        id: MessageId,
        nodes: &[NodeId],
        timeout: Duration,
    ) -> Result<BTreeMap<NodeId, Payload>, RunnerError> {
        let wanted: BTreeSet<NodeId> = nodes.iter().copied().collect();
        let done = |log: &[NodeNotification]| {
            let delivered: BTreeSet<NodeId> = log
                .iter()
                .filter_map(|n| match n {
                    NodeNotification::Delivered { node, id: d, .. } if *d == id => Some(*node),
                    _ => None,
                })
                .collect();
            wanted.is_subset(&delivered).then_some(())
        };
        self.wait_for(timeout, done).await?;
        Ok(self.deliveries(id))
    }

    /// Wait for every node loop to stop on its own.
    pub async fn await_termination(self, timeout: Duration) -> Result<Vec<RunnerExit>, RunnerError> {
        let LocalCluster { handles, .. } = self;
        tokio::time::timeout(timeout, Self::join(handles))
            .await
            .map_err(|_| RunnerError::Timeout(timeout))?
    }

    /// Cancel every node loop and collect their reports.
    pub async fn shutdown(self) -> Result<Vec<RunnerExit>, RunnerError> {
        info!(num_nodes = self.graph.len(), "Shutting down local cluster");
        self.shutdown.cancel();
        Self::join(self.handles).await
    }

    async fn join(handles: Vec<JoinHandle<RunnerExit>>) -> Result<Vec<RunnerExit>, RunnerError> {
        let mut exits = Vec::with_capacity(handles.len());
        for handle in handles {
            exits.push(handle.await?);
        }
        Ok(exits)
    }

    /// Pull notifications until `check` succeeds on the log.
    async fn wait_for<T>(
        &mut self,
        timeout: Duration,
        check: impl Fn(&[NodeNotification]) -> Option<T>,
    ) -> Result<T, RunnerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = check(&self.log) {
                return Ok(found);
            }
            match tokio::time::timeout_at(deadline, self.notifications.recv()).await {
                Ok(Some(notification)) => self.log.push(notification),
                // Every node has stopped; nothing further can arrive.
                Ok(None) | Err(_) => return Err(RunnerError::Timeout(timeout)),
            }
        }
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("num_nodes", &self.graph.len())
            .field("notifications", &self.log.len())
            .finish()
    }
}
