//! devclaim-scheduler: the allocation half of devclaim.
//!
//! Called by the orchestrator's scheduler for each pending workload:
//!
//! - [`Allocator::filter`] decides which candidate hosts can satisfy the
//!   workload's device claims and tentatively reserves devices
//! - [`Binder::bind`] commits the chosen host, stamping claims and devices
//!   Bound and submitting the workload binding
//!
//! # Architecture
//!
//! ```text
//! Allocator
//!   ├── resolve_claims (ObjectStore)
//!   ├── per-host evaluation (bounded fan-out, spawn_blocking)
//!   │   └── matcher::matches (selector vs device attributes)
//!   └── claim persistence (Pending)
//! Binder
//!   └── claim/device stamping → bind submission
//! ```

pub mod binder;
pub mod claims;
pub mod error;
pub mod filter;
pub mod matcher;

pub use binder::Binder;
pub use claims::resolve_claims;
pub use error::{SchedulerError, SchedulerResult, SelectorError};
pub use filter::{Allocator, FilterConfig, FilterOutcome};
pub use matcher::matches;
