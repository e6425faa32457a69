//! Dolev Broadcast Simulator
//!
//! Scenario runs on top of the deterministic simulation framework.
//!
//! # Architecture
//!
//! The simulator builds on `dolev-simulation` to provide:
//!
//! - **Configuration**: node count, topology shape, fault tolerance, Byzantine
//!   nodes and their behaviour, network conditions
//! - **Workload Generation**: a schedule of broadcasts from correct origins
//! - **Metrics Collection**: per-broadcast delivery, forged deliveries,
//!   latency percentiles
//!
//! # Example
//!
//! ```no_run
//! use dolev_simulator::{Simulator, SimulatorConfig, TopologyKind, WorkloadConfig};
//! use dolev_broadcast::AdversaryMode;
//!
//! let config = SimulatorConfig::new(8)
//!     .with_topology(TopologyKind::RingLattice { k: 2 })
//!     .with_byzantine([3], AdversaryMode::Forge)
//!     .with_workload(WorkloadConfig::single(0, "hello"));
//!
//! let mut simulator = Simulator::new(config).unwrap();
//! let report = simulator.run().unwrap();
//! assert!(report.is_safe());
//! ```

pub mod config;
pub mod metrics;
pub mod runner;
pub mod workload;

pub use config::{OriginSelection, SimulatorConfig, TopologyKind, WorkloadConfig};
pub use metrics::{BroadcastOutcome, LatencySummary, MetricsCollector, SimulationReport};
pub use runner::{Simulator, SimulatorError};
pub use workload::{BroadcastWorkload, PlannedBroadcast};
