//! Per-node async event loop.

use crate::rate_limiter::{RateLimitConfig, RelayRateLimiter};
use crate::timers::TimerManager;
use dolev_core::{Action, Event, OutboundMessage, RequestId, StateMachine};
use dolev_node::{NodeConfigError, NodeStateMachine};
use dolev_types::{MessageId, NodeId, Payload, TopologyError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, span, trace, Level};

/// Capacity of the dedicated timer channel. Only one timer kind exists.
const TIMER_CHANNEL_CAPACITY: usize = 4;

/// Errors from the production runtime.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid node configuration: {0}")]
    Config(#[from] NodeConfigError),

    #[error("Invalid topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("Node {0} is not a cluster member")]
    UnknownNode(NodeId),

    #[error("Inbox of node {0} is closed")]
    ChannelClosed(NodeId),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Node task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Notifications a node reports to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeNotification {
    /// `node` delivered broadcast `id`.
    Delivered {
        node: NodeId,
        id: MessageId,
        payload: Payload,
    },
    /// `node` accepted a submitted broadcast under `id`.
    BroadcastAccepted {
        node: NodeId,
        request_id: RequestId,
        id: MessageId,
    },
    /// `node` stopped after `idle_for` without traffic.
    Terminated { node: NodeId, idle_for: Duration },
}

/// Routing table from node id to that node's inbox.
///
/// Built once before any node starts, then shared read-only.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    inboxes: HashMap<NodeId, mpsc::Sender<Event>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node`'s inbox. Returns the previous sender, if any.
    pub fn insert(
        &mut self,
        node: NodeId,
        inbox: mpsc::Sender<Event>,
    ) -> Option<mpsc::Sender<Event>> {
        self.inboxes.insert(node, inbox)
    }

    pub fn get(&self, node: NodeId) -> Option<&mpsc::Sender<Event>> {
        self.inboxes.get(&node)
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
}

/// Why a node loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The liveness monitor saw too long a silence.
    Terminated,
    /// The shutdown token was cancelled.
    Cancelled,
    /// Every sender to the inbox was dropped.
    InboxClosed,
}

/// Counters kept by one node loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub events_handled: u64,
    pub relays_sent: u64,
    pub relays_rate_limited: u64,
    pub timers_set: u64,
    pub deliveries: u64,
}

/// Final report of a node loop.
#[derive(Debug, Clone)]
pub struct RunnerExit {
    pub node: NodeId,
    pub reason: ExitReason,
    pub stats: RunnerStats,
}

/// Drives one [`NodeStateMachine`] on the tokio runtime.
///
/// Inbound relays and client submissions arrive on the inbox; timers have
/// their own channel so a relay flood never starves the liveness poll.
pub struct NodeRunner {
    state: NodeStateMachine,
    inbox: mpsc::Receiver<Event>,
    timer_rx: mpsc::Receiver<Event>,
    timers: TimerManager,
    peers: std::sync::Arc<PeerDirectory>,
    notifications: mpsc::UnboundedSender<NodeNotification>,
    shutdown: CancellationToken,
    rate_limiter: RelayRateLimiter,
    /// Relay jitter source.
    rng: ChaCha8Rng,
    start_time: Instant,
    stats: RunnerStats,
}

impl NodeRunner {
    /// Wire a node to its inbox and the shared peer directory.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn new(
        state: NodeStateMachine,
        inbox: mpsc::Receiver<Event>,
        peers: std::sync::Arc<PeerDirectory>,
        notifications: mpsc::UnboundedSender<NodeNotification>,
        shutdown: CancellationToken,
        rate_limit: RateLimitConfig,
        seed: u64,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
        let node_seed = seed ^ (state.node_id().0 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            state,
            inbox,
            timer_rx,
            timers: TimerManager::new(timer_tx),
            peers,
            notifications,
            shutdown,
            rate_limiter: RelayRateLimiter::new(rate_limit),
            rng: ChaCha8Rng::seed_from_u64(node_seed),
            start_time: Instant::now(),
            stats: RunnerStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.state.node_id()
    }

    /// Run the event loop until termination, cancellation or inbox closure.
    pub async fn run(mut self) -> RunnerExit {
        let node = self.node_id();
        info!(
            node = node.0,
            behavior = self.state.protocol().behavior(),
            peers = self.state.topology().peers().len(),
            "Starting node runner"
        );

        self.state.set_time(self.start_time.elapsed());
        let actions = self.state.start();
        self.process_actions(actions);

        let reason = loop {
            if self.state.is_terminated() {
                break ExitReason::Terminated;
            }

            // Priority: shutdown, then timers, then inbound traffic.
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    break ExitReason::Cancelled;
                }

                Some(event) = self.timer_rx.recv() => {
                    self.dispatch(event);
                }

                event = self.inbox.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break ExitReason::InboxClosed,
                },
            }
        };

        self.timers.cancel_all();
        info!(
            node = node.0,
            reason = ?reason,
            events = self.stats.events_handled,
            deliveries = self.stats.deliveries,
            "Node runner stopped"
        );

        RunnerExit {
            node,
            reason,
            stats: self.stats,
        }
    }

    fn dispatch(&mut self, event: Event) {
        if let Event::BroadcastReceived { from, .. } = &event {
            if !self.rate_limiter.check(*from) {
                self.stats.relays_rate_limited += 1;
                debug!(node = self.node_id().0, peer = from.0, "Rate limited relay");
                return;
            }
        }

        let event_span = span!(
            Level::TRACE,
            "handle_event",
            event.type = event.type_name(),
            node = self.node_id().0,
        );
        let _guard = event_span.enter();

        self.stats.events_handled += 1;
        self.state.set_time(self.start_time.elapsed());
        let actions = self.state.handle(event);
        self.process_actions(actions);
    }

    fn process_actions(&mut self, actions: Vec<Action>) {
        for action in actions {
            self.process_action(action);
        }
    }

    fn process_action(&mut self, action: Action) {
        let node = self.node_id();
        match action {
            Action::SendTo { to, message } => self.send(to, message),

            Action::SetTimer { id, duration } => {
                self.stats.timers_set += 1;
                self.timers.set_timer(id, duration);
            }

            Action::CancelTimer { id } => self.timers.cancel_timer(id),

            Action::EmitDelivered { id, payload } => {
                self.stats.deliveries += 1;
                self.notify(NodeNotification::Delivered { node, id, payload });
            }

            Action::EmitBroadcastAccepted { request_id, id } => {
                self.notify(NodeNotification::BroadcastAccepted {
                    node,
                    request_id,
                    id,
                });
            }

            Action::Terminate { idle_for } => {
                self.timers.cancel_all();
                self.notify(NodeNotification::Terminated { node, idle_for });
            }
        }
    }

    /// Hand a relay to the peer's inbox after a random delay in
    /// `[0, max_relay_delay]`. Fire-and-forget.
    fn send(&mut self, to: NodeId, message: OutboundMessage) {
        let from = self.node_id();
        let Some(inbox) = self.peers.get(to).cloned() else {
            trace!(node = from.0, peer = to.0, "Peer not in directory, dropping relay");
            return;
        };
        let event = match message {
            OutboundMessage::Broadcast(gossip) => Event::BroadcastReceived { from, gossip },
        };

        let max_delay = self.state.config().max_relay_delay;
        let delay = if max_delay.is_zero() {
            Duration::ZERO
        } else {
            let nanos = self.rng.gen_range(0..=max_delay.as_nanos() as u64);
            Duration::from_nanos(nanos)
        };

        self.stats.relays_sent += 1;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if inbox.send(event).await.is_err() {
                trace!(node = from.0, peer = to.0, "Peer unreachable, dropping relay");
            }
        });
    }

    fn notify(&self, notification: NodeNotification) {
        if self.notifications.send(notification).is_err() {
            trace!(node = self.node_id().0, "No notification listener");
        }
    }
}

impl std::fmt::Debug for NodeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRunner")
            .field("node", &self.node_id())
            .field("active_timers", &self.timers.active_count())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolev_liveness::LivenessConfig;
    use dolev_node::{NodeBehavior, NodeConfig};
    use dolev_types::{NetworkGraph, StaticTopology};
    use std::sync::Arc;

    fn node(graph: &Arc<NetworkGraph>, id: u32, config: NodeConfig) -> NodeStateMachine {
        let topology = StaticTopology::new(NodeId(id), graph.clone())
            .unwrap()
            .into_arc();
        NodeStateMachine::new(topology, config, NodeBehavior::Correct).unwrap()
    }

    #[test]
    fn test_peer_directory() {
        let mut directory = PeerDirectory::new();
        assert!(directory.is_empty());

        let (tx, _rx) = mpsc::channel(1);
        assert!(directory.insert(NodeId(1), tx.clone()).is_none());
        assert!(directory.insert(NodeId(1), tx).is_some());
        assert_eq!(directory.len(), 1);
        assert!(directory.get(NodeId(1)).is_some());
        assert!(directory.get(NodeId(2)).is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let graph = Arc::new(NetworkGraph::complete(3).unwrap());
        let (tx, rx) = mpsc::channel(8);
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let mut directory = PeerDirectory::new();
        directory.insert(NodeId(0), tx);
        let runner = NodeRunner::new(
            node(&graph, 0, NodeConfig::default()),
            rx,
            Arc::new(directory),
            notify_tx,
            shutdown.clone(),
            RateLimitConfig::default(),
            7,
        );

        let handle = tokio::spawn(runner.run());
        shutdown.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("runner should stop")
            .unwrap();
        assert_eq!(exit.node, NodeId(0));
        assert_eq!(exit.reason, ExitReason::Cancelled);
    }

    #[tokio::test]
    async fn test_submit_is_acknowledged() {
        let graph = Arc::new(NetworkGraph::complete(3).unwrap());
        let (tx, rx) = mpsc::channel(8);
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let mut directory = PeerDirectory::new();
        directory.insert(NodeId(0), tx.clone());
        let runner = NodeRunner::new(
            node(&graph, 0, NodeConfig::default()),
            rx,
            Arc::new(directory),
            notify_tx,
            shutdown.clone(),
            RateLimitConfig::default(),
            7,
        );
        let handle = tokio::spawn(runner.run());

        tx.send(Event::SubmitBroadcast {
            payload: Payload::from_static(b"hi"),
            request_id: RequestId(9),
        })
        .await
        .unwrap();

        let id = MessageId::new(NodeId(0), 0);
        let mut received = Vec::new();
        for _ in 0..2 {
            let notification = tokio::time::timeout(Duration::from_secs(1), notify_rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(notification);
        }
        // The originator delivers its own broadcast before acknowledging it.
        assert_eq!(
            received[0],
            NodeNotification::Delivered {
                node: NodeId(0),
                id,
                payload: Payload::from_static(b"hi"),
            }
        );
        assert_eq!(
            received[1],
            NodeNotification::BroadcastAccepted {
                node: NodeId(0),
                request_id: RequestId(9),
                id,
            }
        );

        shutdown.cancel();
        let exit = handle.await.unwrap();
        // Peers 1 and 2 are not in the directory; the relays are dropped.
        assert_eq!(exit.stats.relays_sent, 0);
        assert_eq!(exit.stats.events_handled, 1);
        assert_eq!(exit.stats.deliveries, 1);
    }

    #[tokio::test]
    async fn test_idle_node_terminates() {
        let graph = Arc::new(NetworkGraph::complete(3).unwrap());
        let config = NodeConfig::default().with_liveness(
            LivenessConfig::default()
                .with_inactivity_threshold(Duration::from_millis(60))
                .with_poll_interval(Duration::from_millis(20)),
        );
        let (_tx, rx) = mpsc::channel(8);
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();

        let runner = NodeRunner::new(
            node(&graph, 1, config),
            rx,
            Arc::new(PeerDirectory::new()),
            notify_tx,
            CancellationToken::new(),
            RateLimitConfig::default(),
            7,
        );

        let exit = tokio::time::timeout(Duration::from_secs(2), runner.run())
            .await
            .expect("idle node should terminate");
        assert_eq!(exit.reason, ExitReason::Terminated);

        match notify_rx.recv().await {
            Some(NodeNotification::Terminated { node, idle_for }) => {
                assert_eq!(node, NodeId(1));
                assert!(idle_for > Duration::from_millis(60));
            }
            other => panic!("expected termination notice, got {other:?}"),
        }
    }
}
