//! Scenario runs through the simulator front end.

use dolev_broadcast::AdversaryMode;
use dolev_liveness::LivenessConfig;
use dolev_node::NodeConfig;
use dolev_simulation::{NetworkConfig, SimulationError};
use dolev_simulator::{
    OriginSelection, Simulator, SimulatorConfig, SimulatorError, TopologyKind, WorkloadConfig,
};
use dolev_types::NodeId;
use std::time::Duration;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_default_scenario_delivers_hello() {
    let mut simulator = Simulator::new(SimulatorConfig::default()).unwrap();
    let report = simulator.run().unwrap();

    assert_eq!(report.broadcasts.len(), 1);
    let outcome = &report.broadcasts[0];
    assert_eq!(outcome.payload, "hello");
    assert_eq!(outcome.delivered_by, vec![0, 1, 2, 3, 4]);
    assert!(report.all_delivered());
    assert!(report.is_safe());
    assert_eq!(report.correct_deliveries, 5);
    // The origin's own delivery has no latency sample.
    assert_eq!(report.latency.samples, 4);
}

#[traced_test]
#[test]
fn test_silent_node_is_excluded_from_expectations() {
    let config = SimulatorConfig::new(5).with_byzantine([2], AdversaryMode::Silent);
    let report = Simulator::new(config).unwrap().run().unwrap();

    assert_eq!(report.broadcasts[0].delivered_by, vec![0, 1, 3, 4]);
    assert_eq!(report.expected_deliveries, 4);
    assert!(report.all_delivered());
    assert_eq!(report.adversary, "silent");
}

#[traced_test]
#[test]
fn test_forging_node_on_sparse_graph_is_safe() {
    let config = SimulatorConfig::new(8)
        .with_topology(TopologyKind::RingLattice { k: 2 })
        .with_byzantine([3], AdversaryMode::Forge)
        .with_workload(
            WorkloadConfig::default()
                .with_broadcasts(5)
                .with_origin(OriginSelection::RoundRobin),
        );
    let report = Simulator::new(config).unwrap().run().unwrap();

    assert_eq!(report.connectivity, Some(4));
    assert!(report.is_safe());
    assert!(report.all_delivered());
    assert!(report.broadcasts.iter().all(|b| b.origin != 3));
    assert_eq!(report.correct_deliveries, 5 * 7);
}

#[traced_test]
#[test]
fn test_two_faults_on_larger_graph() {
    let config = SimulatorConfig::new(10)
        .with_topology(TopologyKind::RingLattice { k: 3 })
        .with_fault_tolerance(2)
        .with_byzantine([4, 7], AdversaryMode::Forge)
        .with_workload(WorkloadConfig::single(0, "two faults"));
    let report = Simulator::new(config).unwrap().run().unwrap();

    assert!(report.is_safe());
    assert!(report.all_delivered());
    assert_eq!(report.broadcasts[0].delivered_by, vec![0, 1, 2, 3, 5, 6, 8, 9]);
}

#[traced_test]
#[test]
fn test_report_is_deterministic() {
    let config = SimulatorConfig::new(7)
        .with_topology(TopologyKind::RingLattice { k: 2 })
        .with_byzantine([5], AdversaryMode::Forge)
        .with_network(NetworkConfig {
            jitter_fraction: 0.5,
            ..NetworkConfig::default()
        })
        .with_workload(
            WorkloadConfig::default()
                .with_broadcasts(4)
                .with_origin(OriginSelection::Random),
        )
        .with_seed(1234);

    let a = Simulator::new(config.clone()).unwrap().run().unwrap();
    let b = Simulator::new(config).unwrap().run().unwrap();

    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[traced_test]
#[test]
fn test_idle_nodes_terminate() {
    let config = SimulatorConfig::new(5)
        .with_node_config(NodeConfig::default().with_liveness(
            LivenessConfig::default()
                .with_inactivity_threshold(Duration::from_millis(300))
                .with_poll_interval(Duration::from_millis(50)),
        ))
        .with_duration(Duration::from_secs(2));
    let report = Simulator::new(config).unwrap().run().unwrap();

    assert!(report.all_delivered());
    assert_eq!(report.terminated_nodes, 5);
}

#[traced_test]
#[test]
fn test_json_report_fields() {
    let report = Simulator::new(SimulatorConfig::default())
        .unwrap()
        .run()
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["num_nodes"], 5);
    assert_eq!(json["topology"], "complete");
    assert_eq!(json["adversary"], "none");
    assert_eq!(json["broadcasts"][0]["id"], "msg-0-0");
    assert!(json["latency"]["p99_ms"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_byzantine_origin_is_rejected() {
    let config = SimulatorConfig::new(5)
        .with_byzantine([0], AdversaryMode::Silent)
        .with_workload(WorkloadConfig::single(0, "x"));
    assert!(matches!(
        Simulator::new(config),
        Err(SimulatorError::ByzantineOrigin(NodeId(0)))
    ));
}

#[test]
fn test_unknown_nodes_are_rejected() {
    let config = SimulatorConfig::new(5).with_byzantine([5], AdversaryMode::Silent);
    assert!(matches!(
        Simulator::new(config),
        Err(SimulatorError::UnknownNode(NodeId(5)))
    ));

    let config = SimulatorConfig::new(5).with_workload(WorkloadConfig::single(9, "x"));
    assert!(matches!(
        Simulator::new(config),
        Err(SimulatorError::UnknownNode(NodeId(9)))
    ));
}

#[test]
fn test_weak_topology_is_rejected() {
    let config = SimulatorConfig::new(6).with_topology(TopologyKind::RingLattice { k: 1 });
    assert!(matches!(
        Simulator::new(config),
        Err(SimulatorError::Simulation(SimulationError::Config(_)))
    ));
}
