//! Dolev Broadcast Simulator CLI
//!
//! Run a reliable-broadcast scenario in the deterministic simulator.
//!
//! # Example
//!
//! ```bash
//! # Five fully connected nodes, node 0 broadcasts "hello"
//! dolev-sim
//!
//! # Sparse network with a forging node, JSON output
//! dolev-sim -n 8 --topology ring-lattice --degree 2 --byzantine 3 --adversary forge --json
//! ```

use clap::{Parser, ValueEnum};
use dolev_broadcast::AdversaryMode;
use dolev_node::{NodeConfig, TopologyCheck};
use dolev_simulation::NetworkConfig;
use dolev_simulator::{OriginSelection, Simulator, SimulatorConfig, TopologyKind, WorkloadConfig};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TopologyArg {
    /// Every node linked to every other.
    Complete,
    /// Each node linked to its `--degree` nearest neighbours on either side.
    RingLattice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AdversaryArg {
    /// Drop everything.
    Silent,
    /// Relay corrupted payloads.
    Forge,
}

impl From<AdversaryArg> for AdversaryMode {
    fn from(arg: AdversaryArg) -> Self {
        match arg {
            AdversaryArg::Silent => AdversaryMode::Silent,
            AdversaryArg::Forge => AdversaryMode::Forge,
        }
    }
}

/// Dolev Broadcast Simulator
///
/// Runs reliable-broadcast scenarios in a fully deterministic environment.
/// Given the same seed, produces identical results every run.
#[derive(Parser, Debug)]
#[command(name = "dolev-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of nodes
    #[arg(short = 'n', long, default_value = "5")]
    nodes: u32,

    /// Byzantine nodes tolerated (f)
    #[arg(short = 'f', long, default_value = "1")]
    fault_tolerance: usize,

    /// Shape of the communication graph
    #[arg(long, value_enum, default_value = "complete")]
    topology: TopologyArg,

    /// Neighbours on either side for ring-lattice
    #[arg(short = 'k', long, default_value = "2")]
    degree: u32,

    /// Byzantine node ids, comma separated
    #[arg(short = 'b', long, value_delimiter = ',')]
    byzantine: Vec<u32>,

    /// Behaviour of the Byzantine nodes
    #[arg(long, value_enum, default_value = "silent")]
    adversary: AdversaryArg,

    /// Broadcast payload
    #[arg(short = 'p', long, default_value = "hello")]
    payload: String,

    /// Number of broadcasts
    #[arg(long, default_value = "1")]
    broadcasts: usize,

    /// Originating node; cycles through correct nodes when omitted with
    /// several broadcasts
    #[arg(short = 'o', long)]
    origin: Option<u32>,

    /// Interval between broadcasts in milliseconds
    #[arg(long, default_value = "100")]
    interval_ms: u64,

    /// Random seed for deterministic simulation
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Simulated duration in milliseconds
    #[arg(short = 'd', long, default_value = "3000")]
    duration_ms: u64,

    /// One-hop latency in milliseconds
    #[arg(long, default_value = "10")]
    latency_ms: u64,

    /// Latency jitter as a fraction of the latency (0.0-1.0)
    #[arg(long, default_value = "0.1")]
    jitter: f64,

    /// Packet loss rate (0.0-1.0)
    #[arg(long, default_value = "0.0")]
    packet_loss: f64,

    /// Upper bound of the random delay added to every relay, in milliseconds
    #[arg(long, default_value = "0")]
    max_relay_delay_ms: u64,

    /// Run even if the topology cannot carry f faults
    #[arg(long)]
    allow_weak_topology: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn to_config(&self) -> SimulatorConfig {
        let topology = match self.topology {
            TopologyArg::Complete => TopologyKind::Complete,
            TopologyArg::RingLattice => TopologyKind::RingLattice { k: self.degree },
        };
        let origin = match self.origin {
            Some(node) => OriginSelection::Fixed { node },
            None if self.broadcasts > 1 => OriginSelection::RoundRobin,
            None => OriginSelection::Fixed { node: 0 },
        };
        let topology_check = if self.allow_weak_topology {
            TopologyCheck::Warn
        } else {
            TopologyCheck::Enforce
        };

        SimulatorConfig::new(self.nodes)
            .with_topology(topology)
            .with_node_config(
                NodeConfig::default()
                    .with_fault_tolerance(self.fault_tolerance)
                    .with_max_relay_delay(Duration::from_millis(self.max_relay_delay_ms))
                    .with_topology_check(topology_check),
            )
            .with_network(NetworkConfig {
                latency: Duration::from_millis(self.latency_ms),
                jitter_fraction: self.jitter.clamp(0.0, 1.0),
                packet_loss_rate: self.packet_loss.clamp(0.0, 1.0),
            })
            .with_byzantine(self.byzantine.iter().copied(), self.adversary.into())
            .with_workload(
                WorkloadConfig::default()
                    .with_payload(self.payload.clone())
                    .with_broadcasts(self.broadcasts)
                    .with_interval(Duration::from_millis(self.interval_ms))
                    .with_origin(origin),
            )
            .with_seed(self.seed)
            .with_duration(Duration::from_millis(self.duration_ms))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,dolev_simulator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.to_config();

    info!(
        nodes = config.num_nodes,
        topology = %config.topology.label(),
        fault_tolerance = config.node.broadcast.fault_tolerance,
        byzantine = ?config.byzantine,
        seed = config.seed,
        "Starting simulation"
    );

    let report = match Simulator::new(config).and_then(|mut sim| sim.run()) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Simulation failed");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: failed to serialize report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        report.print_summary();
    }

    if report.is_safe() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
