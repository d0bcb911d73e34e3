//! The narrow object store interface consumed by the allocator, binder and
//! background loops.
//!
//! Writes are blind: `update_*` replaces the stored object wholesale with
//! no version check, and fails only when the object does not exist.

use tokio::sync::broadcast;

use crate::error::StateResult;
use crate::types::{Binding, Claim, Device, Host, Workload};
use crate::watch::StoreEvent;

pub trait ObjectStore: Send + Sync {
    fn get_claim(&self, namespace: &str, name: &str) -> StateResult<Option<Claim>>;
    fn list_claims(&self) -> StateResult<Vec<Claim>>;
    fn update_claim(&self, claim: &Claim) -> StateResult<()>;

    fn get_device(&self, name: &str) -> StateResult<Option<Device>>;
    fn list_devices(&self) -> StateResult<Vec<Device>>;
    fn update_device(&self, device: &Device) -> StateResult<()>;

    fn get_host(&self, name: &str) -> StateResult<Option<Host>>;
    fn list_hosts(&self) -> StateResult<Vec<Host>>;

    fn get_workload(&self, namespace: &str, name: &str) -> StateResult<Option<Workload>>;

    /// Submit a workload-to-host binding.
    fn bind_workload(&self, binding: &Binding) -> StateResult<()>;

    /// Subscribe to every subsequent change.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
