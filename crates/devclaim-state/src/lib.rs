//! devclaim-state: object model and object store for devclaim.
//!
//! Holds the types every other crate shares (claims, devices, hosts,
//! workloads), the narrow [`ObjectStore`] interface through which the
//! allocator, binder, and background loops read and write them, and a
//! [redb](https://docs.rs/redb)-backed [`StateStore`] that implements it.
//!
//! # Architecture
//!
//! ```text
//! ObjectStore (trait)
//!   ├── StateStore (redb, JSON values)
//!   │   └── broadcast::Sender<StoreEvent>  (watch stream)
//!   └── test doubles
//! WorkQueue   (dedup keyed queue shared by the background loops)
//! ```
//!
//! Writes are blind upserts: no resource versions, no conditional updates.
//! Racing writers are expected and are repaired by the reconciliation loops.

pub mod error;
pub mod object_store;
pub mod queue;
pub mod store;
pub mod tables;
pub mod types;
pub mod watch;

pub use error::{StateError, StateResult};
pub use object_store::ObjectStore;
pub use queue::WorkQueue;
pub use store::StateStore;
pub use types::*;
pub use watch::{DeletedObject, ObjectKey, StoreEvent, WatchEvent};
