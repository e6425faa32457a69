//! Broadcast workload generation.

use crate::config::{OriginSelection, WorkloadConfig};
use dolev_types::{NodeId, Payload};
use rand::Rng;
use std::time::Duration;

/// One broadcast to submit during the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedBroadcast {
    /// Simulated submission time.
    pub at: Duration,
    pub origin: NodeId,
    pub payload: Payload,
}

/// Turns a [`WorkloadConfig`] into a submission schedule.
#[derive(Debug)]
pub struct BroadcastWorkload {
    config: WorkloadConfig,
}

impl BroadcastWorkload {
    pub fn new(config: WorkloadConfig) -> Self {
        Self { config }
    }

    /// Payload text of the `index`-th broadcast.
    pub fn payload_for(&self, index: usize) -> Payload {
        if self.config.broadcasts <= 1 {
            Payload::from(self.config.payload.clone())
        } else {
            Payload::from(format!("{}-{}", self.config.payload, index))
        }
    }

    /// Plan every broadcast. Origins are drawn from `correct`, which must be
    /// non-empty; a fixed origin is used as given.
    pub fn plan(&self, correct: &[NodeId], rng: &mut impl Rng) -> Vec<PlannedBroadcast> {
        if correct.is_empty() {
            return Vec::new();
        }
        (0..self.config.broadcasts)
            .map(|index| {
                let origin = match self.config.origin {
                    OriginSelection::Fixed { node } => NodeId(node),
                    OriginSelection::RoundRobin => correct[index % correct.len()],
                    OriginSelection::Random => correct[rng.gen_range(0..correct.len())],
                };
                PlannedBroadcast {
                    at: self.config.interval * index as u32,
                    origin,
                    payload: self.payload_for(index),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn nodes(ids: &[u32]) -> Vec<NodeId> {
        ids.iter().map(|&n| NodeId(n)).collect()
    }

    #[test]
    fn test_single_broadcast_keeps_payload() {
        let workload = BroadcastWorkload::new(WorkloadConfig::single(2, "hello"));
        let plan = workload.plan(&nodes(&[0, 1, 2]), &mut ChaCha8Rng::seed_from_u64(0));

        assert_eq!(
            plan,
            vec![PlannedBroadcast {
                at: Duration::ZERO,
                origin: NodeId(2),
                payload: Payload::from_static(b"hello"),
            }]
        );
    }

    #[test]
    fn test_round_robin_skips_byzantine() {
        let workload = BroadcastWorkload::new(
            WorkloadConfig::default()
                .with_broadcasts(4)
                .with_interval(Duration::from_millis(50))
                .with_origin(OriginSelection::RoundRobin),
        );
        let plan = workload.plan(&nodes(&[0, 2, 4]), &mut ChaCha8Rng::seed_from_u64(0));

        let origins: Vec<u32> = plan.iter().map(|p| p.origin.0).collect();
        assert_eq!(origins, vec![0, 2, 4, 0]);
        assert_eq!(plan[3].at, Duration::from_millis(150));
        assert_eq!(plan[1].payload, Payload::from_static(b"hello-1"));
    }

    #[test]
    fn test_random_origin_is_seeded() {
        let workload = BroadcastWorkload::new(
            WorkloadConfig::default()
                .with_broadcasts(16)
                .with_origin(OriginSelection::Random),
        );
        let correct = nodes(&[1, 3, 5, 7]);
        let a = workload.plan(&correct, &mut ChaCha8Rng::seed_from_u64(9));
        let b = workload.plan(&correct, &mut ChaCha8Rng::seed_from_u64(9));

        assert_eq!(a, b);
        assert!(a.iter().all(|p| correct.contains(&p.origin)));
    }
}
