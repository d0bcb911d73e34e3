//! Binder: commits a chosen host for a workload.
//!
//! Stamps every claim Bound to the workload, every named device Bound to
//! its claim, then submits the workload binding. Writes already committed
//! are never rolled back; the reconciliation loops repair whatever a
//! partial failure leaves behind.
//!
//! Claim device lists come from the first feasible host of the filter. When
//! the scheduler picks another host, the listed devices may live elsewhere;
//! the bind still goes through and the claim message records the mismatch.

use std::collections::HashSet;
use std::sync::Arc;

use devclaim_state::{Binding, ClaimPhase, DevicePhase, ObjectStore, claim_key};
use tracing::{debug, info, warn};

use crate::claims::resolve_claims;
use crate::error::{SchedulerError, SchedulerResult};

/// Reason stamped on claims once bound.
pub const BOUND_REASON: &str = "claim bound to devices";

#[derive(Clone)]
pub struct Binder {
    store: Arc<dyn ObjectStore>,
}

impl Binder {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Bind the named workload to `binding.target_host`.
    pub fn bind(&self, binding: &Binding) -> SchedulerResult<()> {
        let workload_key = claim_key(&binding.workload_namespace, &binding.workload_name);
        let workload = self
            .store
            .get_workload(&binding.workload_namespace, &binding.workload_name)?
            .ok_or_else(|| SchedulerError::WorkloadNotFound(workload_key.clone()))?;

        let offered: Option<HashSet<String>> = self
            .store
            .get_host(&binding.target_host)?
            .map(|host| host.allocatable_devices.into_iter().collect());

        for mut claim in resolve_claims(self.store.as_ref(), &workload)? {
            claim.bound_workload_name = workload.name.clone();
            claim.phase = ClaimPhase::Bound;
            claim.reason = BOUND_REASON.to_string();
            claim.message.clear();
            if let Some(offered) = &offered {
                let foreign: Vec<&str> = claim
                    .explicit_device_names
                    .iter()
                    .map(String::as_str)
                    .filter(|name| !offered.contains(*name))
                    .collect();
                if !foreign.is_empty() {
                    warn!(
                        claim = %claim.table_key(),
                        host = %binding.target_host,
                        devices = ?foreign,
                        "binding devices the target host does not offer"
                    );
                    claim.message = format!(
                        "devices [{}] are not offered by host {}",
                        foreign.join(" "),
                        binding.target_host
                    );
                }
            }
            self.store.update_claim(&claim)?;
            debug!(claim = %claim.table_key(), workload = %workload_key, "claim bound");

            for name in &claim.explicit_device_names {
                let mut device = self
                    .store
                    .get_device(name)?
                    .ok_or_else(|| SchedulerError::DeviceNotFound(name.clone()))?;
                device.assign(&claim.namespace, &claim.name, DevicePhase::Bound);
                device.message.clear();
                device.reason.clear();
                if let Err(e) = self.store.update_device(&device) {
                    warn!(device = %name, error = %e, "device bind failed, reverting device");
                    device.release();
                    if let Err(revert) = self.store.update_device(&device) {
                        warn!(device = %name, error = %revert, "device revert failed");
                    }
                    return Err(e.into());
                }
            }
        }

        self.store
            .bind_workload(binding)
            .map_err(|e| SchedulerError::BindFailed(e.to_string()))?;
        info!(workload = %workload_key, host = %binding.target_host, "workload bound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devclaim_state::{
        Claim, Device, Host, StateError, StateResult, StateStore, StoreEvent, Workload,
    };
    use tokio::sync::broadcast;

    fn seeded() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for name in ["d1", "d2"] {
            store.put_device(&Device::new(name, "gpu")).unwrap();
        }
        let mut c = Claim::new("ml", "c1");
        c.device_class = "gpu".into();
        c.desired_count = 2;
        c.explicit_device_names = vec!["d1".into(), "d2".into()];
        c.phase = ClaimPhase::Pending;
        store.put_claim(&c).unwrap();
        store
            .put_workload(&Workload::new("ml", "train", "uid-1").with_claim("c1"))
            .unwrap();
        store
    }

    fn binding(uid: &str) -> Binding {
        Binding {
            workload_name: "train".into(),
            workload_namespace: "ml".into(),
            workload_uid: uid.into(),
            target_host: "h1".into(),
        }
    }

    #[test]
    fn bind_stamps_claims_devices_and_workload() {
        let store = seeded();
        let binder = Binder::new(Arc::new(store.clone()));
        binder.bind(&binding("uid-1")).unwrap();

        let claim = store.get_claim("ml", "c1").unwrap().unwrap();
        assert_eq!(claim.phase, ClaimPhase::Bound);
        assert_eq!(claim.bound_workload_name, "train");

        for name in ["d1", "d2"] {
            let d = store.get_device(name).unwrap().unwrap();
            assert_eq!(d.phase, DevicePhase::Bound);
            assert!(d.is_owned_by("ml", "c1"));
        }
        assert_eq!(store.get_workload("ml", "train").unwrap().unwrap().host, "h1");
    }

    #[test]
    fn devices_off_target_host_are_flagged() {
        let store = seeded();
        store.put_host(&Host::new("h1", &["d1"])).unwrap();
        let binder = Binder::new(Arc::new(store.clone()));
        binder.bind(&binding("uid-1")).unwrap();

        let claim = store.get_claim("ml", "c1").unwrap().unwrap();
        assert_eq!(claim.phase, ClaimPhase::Bound);
        assert_eq!(claim.message, "devices [d2] are not offered by host h1");
        assert_eq!(
            store.get_device("d2").unwrap().unwrap().phase,
            DevicePhase::Bound
        );
    }

    #[test]
    fn devices_on_target_host_leave_message_empty() {
        let store = seeded();
        store.put_host(&Host::new("h1", &["d1", "d2"])).unwrap();
        let binder = Binder::new(Arc::new(store.clone()));
        binder.bind(&binding("uid-1")).unwrap();
        assert!(store.get_claim("ml", "c1").unwrap().unwrap().message.is_empty());
    }

    #[test]
    fn missing_workload() {
        let store = StateStore::open_in_memory().unwrap();
        let binder = Binder::new(Arc::new(store));
        assert!(matches!(
            binder.bind(&binding("uid-1")),
            Err(SchedulerError::WorkloadNotFound(_))
        ));
    }

    #[test]
    fn failed_submission_keeps_committed_writes() {
        let store = seeded();
        let binder = Binder::new(Arc::new(store.clone()));
        let err = binder.bind(&binding("other-uid")).unwrap_err();
        assert!(matches!(err, SchedulerError::BindFailed(_)));

        // No rollback: reconciliation owns the repair.
        let claim = store.get_claim("ml", "c1").unwrap().unwrap();
        assert_eq!(claim.phase, ClaimPhase::Bound);
        assert!(store.get_workload("ml", "train").unwrap().unwrap().host.is_empty());
    }

    /// Store whose device writes fail for one device name.
    struct FailingDeviceWrites {
        inner: StateStore,
        poisoned: String,
    }

    impl ObjectStore for FailingDeviceWrites {
        fn get_claim(&self, ns: &str, name: &str) -> StateResult<Option<Claim>> {
            self.inner.get_claim(ns, name)
        }
        fn list_claims(&self) -> StateResult<Vec<Claim>> {
            self.inner.list_claims()
        }
        fn update_claim(&self, claim: &Claim) -> StateResult<()> {
            self.inner.update_claim(claim)
        }
        fn get_device(&self, name: &str) -> StateResult<Option<Device>> {
            self.inner.get_device(name)
        }
        fn list_devices(&self) -> StateResult<Vec<Device>> {
            self.inner.list_devices()
        }
        fn update_device(&self, device: &Device) -> StateResult<()> {
            if device.name == self.poisoned && device.phase == DevicePhase::Bound {
                return Err(StateError::Write("disk full".into()));
            }
            self.inner.update_device(device)
        }
        fn get_host(&self, name: &str) -> StateResult<Option<Host>> {
            self.inner.get_host(name)
        }
        fn list_hosts(&self) -> StateResult<Vec<Host>> {
            self.inner.list_hosts()
        }
        fn get_workload(&self, ns: &str, name: &str) -> StateResult<Option<Workload>> {
            self.inner.get_workload(ns, name)
        }
        fn bind_workload(&self, binding: &Binding) -> StateResult<()> {
            self.inner.bind_workload(binding)
        }
        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn device_write_failure_reverts_that_device_and_aborts() {
        let store = seeded();
        let mut d2 = store.get_device("d2").unwrap().unwrap();
        d2.assign("ml", "c1", DevicePhase::Pending);
        store.put_device(&d2).unwrap();

        let binder = Binder::new(Arc::new(FailingDeviceWrites {
            inner: store.clone(),
            poisoned: "d2".into(),
        }));
        let err = binder.bind(&binding("uid-1")).unwrap_err();
        assert!(matches!(err, SchedulerError::State(StateError::Write(_))));

        // d1 committed before the failure stays Bound.
        assert_eq!(store.get_device("d1").unwrap().unwrap().phase, DevicePhase::Bound);
        let d2 = store.get_device("d2").unwrap().unwrap();
        assert_eq!(d2.phase, DevicePhase::Available);
        assert!(!d2.is_owned());
        // Binding never submitted.
        assert!(store.get_workload("ml", "train").unwrap().unwrap().host.is_empty());
    }
}
