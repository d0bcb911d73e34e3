//! devclaim-health: host health monitoring.
//!
//! Watches hosts and quarantines the devices of hosts that are terminated,
//! deleted, or not ready for longer than a debounce window. Quarantined
//! devices go to Pending with a message naming the host, so the allocator
//! stops handing them out.
//!
//! - [`SuspectTracker`]: per-host debounce of not-ready observations
//! - [`HostHealthMonitor`]: watch loop, host cache, quarantine with retry

pub mod error;
pub mod monitor;
pub mod tracker;

pub use error::{HealthError, HealthResult};
pub use monitor::{HealthMonitorConfig, HostHealthMonitor, HostOutcome};
pub use tracker::{HostVerdict, SuspectTracker};
