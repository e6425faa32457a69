//! Metrics collection and reporting for simulations.

use dolev_types::NodeId;
use hdrhistogram::{CreationError, Histogram};
use serde::Serialize;
use std::time::Duration;

/// Delivery latency percentiles, in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// What became of one planned broadcast.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BroadcastOutcome {
    pub origin: u32,
    /// Instance id, once the origin accepted the submission.
    pub id: Option<String>,
    pub payload: String,
    pub submitted_at_ms: f64,
    /// Correct nodes that delivered the submitted payload.
    pub delivered_by: Vec<u32>,
    /// Correct nodes that never delivered.
    pub missing: Vec<u32>,
    /// Correct nodes that delivered some other payload under this id.
    pub forged: Vec<u32>,
}

impl BroadcastOutcome {
    pub fn is_complete(&self) -> bool {
        self.id.is_some() && self.missing.is_empty() && self.forged.is_empty()
    }
}

/// Final report of a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationReport {
    pub num_nodes: u32,
    pub topology: String,
    /// Minimum number of disjoint paths over all member pairs.
    pub connectivity: Option<usize>,
    pub fault_tolerance: usize,
    pub byzantine: Vec<u32>,
    pub adversary: String,
    pub seed: u64,
    pub simulated_time_ms: f64,

    pub broadcasts: Vec<BroadcastOutcome>,
    pub correct_deliveries: u64,
    pub expected_deliveries: u64,
    pub forged_deliveries: u64,
    pub latency: LatencySummary,

    pub events_processed: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub terminated_nodes: usize,
}

impl SimulationReport {
    /// No correct node delivered a payload its origin did not broadcast.
    pub fn is_safe(&self) -> bool {
        self.forged_deliveries == 0
    }

    /// Every correct node delivered every accepted broadcast.
    pub fn all_delivered(&self) -> bool {
        self.broadcasts.iter().all(BroadcastOutcome::is_complete)
    }

    pub fn completed_broadcasts(&self) -> usize {
        self.broadcasts.iter().filter(|b| b.is_complete()).count()
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Simulation Complete ===");
        println!("Nodes:        {} ({})", self.num_nodes, self.topology);
        match self.connectivity {
            Some(k) => println!("Connectivity: {k} (f = {})", self.fault_tolerance),
            None => println!("Connectivity: n/a (f = {})", self.fault_tolerance),
        }
        if !self.byzantine.is_empty() {
            println!("Byzantine:    {:?} ({})", self.byzantine, self.adversary);
        }
        println!("Seed:         {}", self.seed);
        println!("Sim time:     {:.1} ms", self.simulated_time_ms);

        println!("\n=== Broadcasts ===");
        for outcome in &self.broadcasts {
            println!(
                "{:>12}  from {:<3} {:?}: delivered {}/{}{}",
                outcome.id.as_deref().unwrap_or("<pending>"),
                outcome.origin,
                outcome.payload,
                outcome.delivered_by.len(),
                outcome.delivered_by.len() + outcome.missing.len() + outcome.forged.len(),
                if outcome.forged.is_empty() {
                    String::new()
                } else {
                    format!(", FORGED at {:?}", outcome.forged)
                },
            );
        }
        println!(
            "Completed:    {}/{}",
            self.completed_broadcasts(),
            self.broadcasts.len()
        );
        println!(
            "Deliveries:   {}/{}",
            self.correct_deliveries, self.expected_deliveries
        );
        println!("Forged:       {}", self.forged_deliveries);

        println!("\n=== Latency ===");
        println!("P50:          {:.2} ms", self.latency.p50_ms);
        println!("P90:          {:.2} ms", self.latency.p90_ms);
        println!("P99:          {:.2} ms", self.latency.p99_ms);
        println!("Max:          {:.2} ms", self.latency.max_ms);

        println!("\n=== Network ===");
        println!("Events:       {}", self.events_processed);
        println!("Sent:         {}", self.messages_sent);
        println!("Dropped:      {}", self.messages_dropped);
        println!("Terminated:   {}/{}", self.terminated_nodes, self.num_nodes);
    }
}

/// Collects per-broadcast outcomes and delivery latencies.
pub struct MetricsCollector {
    outcomes: Vec<BroadcastOutcome>,
    correct_deliveries: u64,
    expected_deliveries: u64,
    forged_deliveries: u64,
    /// Latency histogram (microseconds).
    latency_histogram: Histogram<u64>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, CreationError> {
        Ok(Self {
            outcomes: Vec::new(),
            correct_deliveries: 0,
            expected_deliveries: 0,
            forged_deliveries: 0,
            latency_histogram: Histogram::new(3)?,
        })
    }

    /// Record the end state of one broadcast, expected at `expected` correct nodes.
    pub fn record_outcome(&mut self, outcome: BroadcastOutcome, expected: usize) {
        self.correct_deliveries += outcome.delivered_by.len() as u64;
        self.forged_deliveries += outcome.forged.len() as u64;
        self.expected_deliveries += expected as u64;
        self.outcomes.push(outcome);
    }

    /// Record the submit-to-deliver latency of one remote delivery.
    pub fn record_latency(&mut self, latency: Duration) {
        let latency_us = latency.as_micros() as u64;
        self.latency_histogram.saturating_record(latency_us);
    }

    pub fn latency_summary(&self) -> LatencySummary {
        let h = &self.latency_histogram;
        if h.is_empty() {
            return LatencySummary::default();
        }
        let ms = |us: u64| us as f64 / 1000.0;
        LatencySummary {
            samples: h.len(),
            p50_ms: ms(h.value_at_quantile(0.50)),
            p90_ms: ms(h.value_at_quantile(0.90)),
            p99_ms: ms(h.value_at_quantile(0.99)),
            max_ms: ms(h.max()),
        }
    }

    pub fn outcomes(&self) -> &[BroadcastOutcome] {
        &self.outcomes
    }

    pub fn correct_deliveries(&self) -> u64 {
        self.correct_deliveries
    }

    pub fn expected_deliveries(&self) -> u64 {
        self.expected_deliveries
    }

    pub fn forged_deliveries(&self) -> u64 {
        self.forged_deliveries
    }

    /// Hand over the collected outcomes.
    pub fn into_outcomes(self) -> Vec<BroadcastOutcome> {
        self.outcomes
    }
}

/// Sorted raw node ids.
pub(crate) fn ids(nodes: impl IntoIterator<Item = NodeId>) -> Vec<u32> {
    let mut ids: Vec<u32> = nodes.into_iter().map(|n| n.0).collect();
    ids.sort_unstable();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(delivered: &[u32], missing: &[u32], forged: &[u32]) -> BroadcastOutcome {
        BroadcastOutcome {
            origin: 0,
            id: Some("0:0".to_string()),
            payload: "hello".to_string(),
            submitted_at_ms: 0.0,
            delivered_by: delivered.to_vec(),
            missing: missing.to_vec(),
            forged: forged.to_vec(),
        }
    }

    #[test]
    fn test_outcome_completion() {
        assert!(outcome(&[0, 1, 2], &[], &[]).is_complete());
        assert!(!outcome(&[0, 1], &[2], &[]).is_complete());
        assert!(!outcome(&[0, 1], &[], &[2]).is_complete());

        let mut pending = outcome(&[], &[0, 1, 2], &[]);
        pending.id = None;
        assert!(!pending.is_complete());
    }

    #[test]
    fn test_collector_totals() {
        let mut metrics = MetricsCollector::new().unwrap();
        metrics.record_outcome(outcome(&[0, 1, 2], &[], &[]), 3);
        metrics.record_outcome(outcome(&[0], &[1], &[2]), 3);

        assert_eq!(metrics.correct_deliveries(), 4);
        assert_eq!(metrics.expected_deliveries(), 6);
        assert_eq!(metrics.forged_deliveries(), 1);
        assert_eq!(metrics.outcomes().len(), 2);
    }

    #[test]
    fn test_latency_summary() {
        let mut metrics = MetricsCollector::new().unwrap();
        assert_eq!(metrics.latency_summary(), LatencySummary::default());

        for ms in 1..=100u64 {
            metrics.record_latency(Duration::from_millis(ms));
        }
        let summary = metrics.latency_summary();
        assert_eq!(summary.samples, 100);
        assert!((summary.p50_ms - 50.0).abs() < 0.1);
        assert!((summary.max_ms - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_ids_are_sorted() {
        assert_eq!(ids([NodeId(3), NodeId(0), NodeId(2)]), vec![0, 2, 3]);
    }
}
