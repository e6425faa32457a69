//! Broadcast configuration.

use crate::analyzer::MAX_ANALYZED_PATHS;
use serde::{Deserialize, Serialize};

/// Errors that make a [`BroadcastConfig`] unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastConfigError {
    #[error("fault tolerance must be at least 1")]
    ZeroFaultTolerance,

    #[error("max_tracked_paths {requested} exceeds the analyzer limit of {max}")]
    PathCapTooLarge { requested: usize, max: usize },

    /// With `cap <= f` no instance could ever collect `f + 1` disjoint paths.
    #[error("max_tracked_paths {cap} cannot hold the {needed} disjoint paths delivery needs")]
    PathCapTooSmall { cap: usize, needed: usize },
}

/// Reliable broadcast configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Maximum number of Byzantine nodes tolerated (`f`).
    ///
    /// Delivery requires strictly more than `f` mutually disjoint paths.
    pub fault_tolerance: usize,

    /// Upper bound on paths kept per payload variant of one instance.
    pub max_tracked_paths: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            fault_tolerance: 1,
            max_tracked_paths: MAX_ANALYZED_PATHS,
        }
    }
}

impl BroadcastConfig {
    /// Create a new broadcast configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fault tolerance `f`.
    pub fn with_fault_tolerance(mut self, f: usize) -> Self {
        self.fault_tolerance = f;
        self
    }

    /// Set the per-instance path cap.
    pub fn with_max_tracked_paths(mut self, cap: usize) -> Self {
        self.max_tracked_paths = cap;
        self
    }

    /// Number of disjoint paths that triggers delivery.
    pub fn delivery_threshold(&self) -> usize {
        self.fault_tolerance + 1
    }

    /// Check the configuration for values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), BroadcastConfigError> {
        if self.fault_tolerance == 0 {
            return Err(BroadcastConfigError::ZeroFaultTolerance);
        }
        if self.max_tracked_paths > MAX_ANALYZED_PATHS {
            return Err(BroadcastConfigError::PathCapTooLarge {
                requested: self.max_tracked_paths,
                max: MAX_ANALYZED_PATHS,
            });
        }
        if self.max_tracked_paths < self.delivery_threshold() {
            return Err(BroadcastConfigError::PathCapTooSmall {
                cap: self.max_tracked_paths,
                needed: self.delivery_threshold(),
            });
        }
        Ok(())
    }
}
