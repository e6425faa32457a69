//! In-process async runtime for Dolev broadcast nodes.
//!
//! Each node runs as its own tokio task around a [`NodeStateMachine`]:
//!
//! ```text
//! ┌────────────── NodeRunner (one task per node) ──────────────┐
//! │  select! (biased)                                           │
//! │    1. shutdown token                                        │
//! │    2. timer channel  ← TimerManager sleep tasks             │
//! │    3. inbox          ← peers' relays, client submissions    │
//! │                                                             │
//! │  Action::SendTo   → spawned sleep(jitter) → peer inbox      │
//! │  Action::Emit*    → notification channel                    │
//! │  Action::Terminate→ loop exits                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`LocalCluster`] wires a whole graph together through a shared
//! [`PeerDirectory`].
//!
//! [`NodeStateMachine`]: dolev_node::NodeStateMachine

mod cluster;
mod rate_limiter;
mod runner;
mod timers;

pub use cluster::{ClusterConfig, LocalCluster};
pub use rate_limiter::{RateLimitConfig, RelayRateLimiter};
pub use runner::{
    ExitReason, NodeNotification, NodeRunner, PeerDirectory, RunnerError, RunnerExit, RunnerStats,
};
pub use timers::TimerManager;
