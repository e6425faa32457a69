//! Poll-driven silence detector.

use dolev_core::{Action, TimerId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Errors that make a [`LivenessConfig`] unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LivenessConfigError {
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,

    #[error("inactivity threshold must be non-zero")]
    ZeroThreshold,
}

/// Inactivity detection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Silence longer than this terminates the node.
    pub inactivity_threshold: Duration,

    /// How often silence is checked.
    pub poll_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl LivenessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inactivity threshold.
    pub fn with_inactivity_threshold(mut self, threshold: Duration) -> Self {
        self.inactivity_threshold = threshold;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), LivenessConfigError> {
        if self.poll_interval.is_zero() {
            return Err(LivenessConfigError::ZeroPollInterval);
        }
        if self.inactivity_threshold.is_zero() {
            return Err(LivenessConfigError::ZeroThreshold);
        }
        Ok(())
    }
}

/// Tracks when this node last heard from the network.
///
/// The monitor is driven by [`TimerId::Liveness`]. Each poll compares the
/// silence so far with the threshold and either re-arms the timer or emits a
/// single [`Action::Terminate`] and goes quiet.
#[derive(Debug)]
pub struct LivenessMonitor {
    config: LivenessConfig,

    /// Time of the last received message (or of start-up).
    last_activity: Duration,

    /// Set once termination has been requested.
    terminated: bool,

    now: Duration,
}

impl LivenessMonitor {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            last_activity: Duration::ZERO,
            terminated: false,
            now: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Arm the first poll. Silence is measured from this moment.
    pub fn start(&mut self) -> Vec<Action> {
        self.last_activity = self.now;
        vec![self.arm()]
    }

    /// Note that a message arrived.
    pub fn record_activity(&mut self) {
        self.last_activity = self.now;
    }

    pub fn last_activity(&self) -> Duration {
        self.last_activity
    }

    /// Silence so far.
    pub fn idle_for(&self) -> Duration {
        self.now.saturating_sub(self.last_activity)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Handle [`TimerId::Liveness`] firing.
    pub fn on_poll_timer(&mut self) -> Vec<Action> {
        if self.terminated {
            return vec![];
        }

        let idle_for = self.idle_for();
        if idle_for > self.config.inactivity_threshold {
            self.terminated = true;
            info!(
                idle_for = ?idle_for,
                threshold = ?self.config.inactivity_threshold,
                "No activity, terminating"
            );
            return vec![Action::Terminate { idle_for }];
        }

        debug!(idle_for = ?idle_for, "Liveness poll");
        vec![self.arm()]
    }

    fn arm(&self) -> Action {
        Action::SetTimer {
            id: TimerId::Liveness,
            duration: self.config.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(
            LivenessConfig::new()
                .with_inactivity_threshold(Duration::from_secs(3))
                .with_poll_interval(Duration::from_secs(1)),
        )
    }

    fn poll_at(monitor: &mut LivenessMonitor, secs: u64) -> Vec<Action> {
        monitor.set_time(Duration::from_secs(secs));
        monitor.on_poll_timer()
    }

    #[test]
    fn test_start_arms_timer() {
        let mut m = monitor();
        assert_eq!(
            m.start(),
            vec![Action::SetTimer {
                id: TimerId::Liveness,
                duration: Duration::from_secs(1)
            }]
        );
    }

    #[traced_test]
    #[test]
    fn test_terminates_after_silence() {
        let mut m = monitor();
        m.start();

        for secs in 1..=3 {
            let actions = poll_at(&mut m, secs);
            assert!(matches!(actions.as_slice(), [Action::SetTimer { .. }]));
        }

        let actions = poll_at(&mut m, 4);
        assert_eq!(
            actions,
            vec![Action::Terminate {
                idle_for: Duration::from_secs(4)
            }]
        );
        assert!(m.is_terminated());
        assert!(logs_contain("No activity, terminating"));

        // Only once, and the timer is not re-armed.
        assert!(poll_at(&mut m, 5).is_empty());
    }

    #[test]
    fn test_activity_resets_silence() {
        let mut m = monitor();
        m.start();

        m.set_time(Duration::from_secs(3));
        m.record_activity();

        assert!(matches!(poll_at(&mut m, 6).as_slice(), [Action::SetTimer { .. }]));
        assert_eq!(m.idle_for(), Duration::from_secs(3));
        assert!(matches!(poll_at(&mut m, 7).as_slice(), [Action::Terminate { .. }]));
    }

    #[test]
    fn test_validate() {
        assert_eq!(LivenessConfig::default().validate(), Ok(()));
        assert_eq!(
            LivenessConfig::new()
                .with_poll_interval(Duration::ZERO)
                .validate(),
            Err(LivenessConfigError::ZeroPollInterval)
        );
        assert_eq!(
            LivenessConfig::new()
                .with_inactivity_threshold(Duration::ZERO)
                .validate(),
            Err(LivenessConfigError::ZeroThreshold)
        );
    }
}
