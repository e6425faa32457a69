//! Core value types for Dolev reliable broadcast.
//!
//! Everything in this crate is a plain value: no I/O, no clocks, no
//! randomness. The protocol crates build on these types:
//!
//! - [`NodeId`] and [`MessageId`]: participant and broadcast-instance identifiers
//! - [`NodeSet`]: fixed-capacity bitset keyed by `NodeId`
//! - [`Path`]: the set of nodes a relayed message has traversed
//! - [`Topology`] / [`NetworkGraph`]: fixed membership and neighbour relation

mod identifiers;
mod node_set;
mod path;
mod topology;

pub use identifiers::{MessageId, NodeId};
pub use node_set::NodeSet;
pub use path::{Path, PathError};
pub use topology::{NetworkGraph, StaticTopology, Topology, TopologyError};

/// Broadcast payload bytes.
///
/// Reference-counted so relays can fan a payload out to every peer without
/// copying it.
pub type Payload = bytes::Bytes;
