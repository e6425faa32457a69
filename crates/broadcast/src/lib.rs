//! Dolev reliable broadcast.
//!
//! Byzantine-tolerant broadcast over an incomplete network of known
//! membership. A payload is delivered once a node has seen it over more than
//! `f` node-disjoint paths, or directly from its originator.
//!
//! - [`ReliableBroadcaster`]: the correct protocol
//! - [`AdversarialNode`]: faulty behaviours for tests and simulations
//! - [`DisjointPathAnalyzer`]: exact maximum disjoint path set
//! - [`BroadcastInstance`]: per-message state
//!
//! All I/O is performed by the runner via returned `Action`s.

mod adversary;
mod analyzer;
mod config;
mod instance;
mod protocol;
mod state;

pub use adversary::{AdversarialNode, AdversaryMode};
pub use analyzer::{DisjointPathAnalyzer, MAX_ANALYZED_PATHS};
pub use config::{BroadcastConfig, BroadcastConfigError};
pub use instance::{BroadcastInstance, DeliveryReason, InstanceStatus, PathRecord};
pub use protocol::{BroadcastProtocol, BroadcastStats};
pub use state::ReliableBroadcaster;
