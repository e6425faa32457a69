//! Inactivity detection.
//!
//! A node that has heard nothing for long enough assumes the broadcasts it
//! cares about have settled (or that it is cut off) and stops its event loop.
//! This never touches delivery state: whatever was delivered stays delivered.

mod monitor;

pub use monitor::{LivenessConfig, LivenessConfigError, LivenessMonitor};
