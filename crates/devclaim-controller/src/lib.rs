//! devclaim-controller: reconciliation of claims and devices.
//!
//! The allocator and binder write blindly and can race or fail halfway.
//! This crate runs two independent watch-driven loops that repair the
//! resulting drift:
//!
//! - the claim loop releases devices of claims whose workload is gone,
//!   marks claims Lost when a named device disappears, and re-binds devices
//!   that slipped back to Available under a Bound claim
//! - the device loop releases devices whose owner claim no longer exists
//!   or no longer lists them
//!
//! Both loops are idempotent and never fail fatally.

pub mod claim_sync;
pub mod controller;
pub mod device_sync;
pub mod error;

pub use claim_sync::{ClaimSyncReport, sync_claim};
pub use controller::{ControllerConfig, ReconcileController};
pub use device_sync::{DeviceAction, sync_device};
pub use error::{ControllerError, ControllerResult};
