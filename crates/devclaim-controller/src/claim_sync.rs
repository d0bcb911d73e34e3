//! One pass of the claim loop over a single claim.

use devclaim_state::{Claim, ClaimPhase, DevicePhase, ObjectStore};
use tracing::{debug, info, warn};

use crate::error::{ControllerError, ControllerResult};

/// What a claim sync pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSyncReport {
    /// Devices returned to Available because the workload is gone.
    pub released: Vec<String>,
    /// Claim returned to the unallocated state.
    pub reset: bool,
    /// First named device that no longer exists.
    pub lost_device: Option<String>,
    /// Devices re-stamped Bound under a Bound claim.
    pub rebound: Vec<String>,
    pub lost_cleared: bool,
    /// Whether the claim was written back.
    pub persisted: bool,
}

/// Split a `{namespace}/{name}` key.
pub(crate) fn split_key(key: &str) -> ControllerResult<(&str, &str)> {
    match key.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok((ns, name)),
        _ => Err(ControllerError::InvalidKey(key.to_string())),
    }
}

/// Reconcile the claim stored under `key`.
///
/// Returns `None` when the claim no longer exists.
pub fn sync_claim(store: &dyn ObjectStore, key: &str) -> ControllerResult<Option<ClaimSyncReport>> {
    let (namespace, name) = split_key(key)?;
    let Some(original) = store.get_claim(namespace, name)? else {
        debug!(claim = %key, "claim gone, nothing to sync");
        return Ok(None);
    };

    let mut claim = original.clone();
    let mut report = ClaimSyncReport::default();

    if !claim.bound_workload_name.is_empty() {
        if store.get_workload(namespace, &claim.bound_workload_name)?.is_none() {
            info!(claim = %key, workload = %claim.bound_workload_name, "bound workload deleted, releasing devices");
            report.released = release_devices(store, &claim);
            claim.reset_binding();
            report.reset = true;
        }
    } else if claim.phase == ClaimPhase::Bound {
        info!(claim = %key, "bound claim without a workload, releasing devices");
        report.released = release_devices(store, &claim);
        claim.reset_binding();
        report.reset = true;
    }

    for device_name in &claim.explicit_device_names {
        match store.get_device(device_name)? {
            None => {
                if report.lost_device.is_none() {
                    report.lost_device = Some(device_name.clone());
                }
            }
            Some(mut device)
                if claim.phase == ClaimPhase::Bound && device.phase == DevicePhase::Available =>
            {
                device.assign(&claim.namespace, &claim.name, DevicePhase::Bound);
                match store.update_device(&device) {
                    Ok(()) => report.rebound.push(device_name.clone()),
                    Err(e) => warn!(claim = %key, device = %device_name, error = %e, "rebind failed"),
                }
            }
            Some(_) => {}
        }
    }

    if let Some(missing) = &report.lost_device {
        claim.phase = ClaimPhase::Lost;
        claim.reason = format!("device {missing} not found");
    } else if claim.phase == ClaimPhase::Lost {
        claim.phase = if claim.bound_workload_name.is_empty() {
            ClaimPhase::Unset
        } else {
            ClaimPhase::Bound
        };
        claim.reason.clear();
        report.lost_cleared = true;
    }

    if claim != original {
        store.update_claim(&claim)?;
        report.persisted = true;
        debug!(claim = %key, phase = %claim.phase, "claim reconciled");
    }

    Ok(Some(report))
}

/// Release every device the claim names, unless another claim holds it.
fn release_devices(store: &dyn ObjectStore, claim: &Claim) -> Vec<String> {
    let mut released = Vec::new();
    for name in &claim.explicit_device_names {
        let mut device = match store.get_device(name) {
            Ok(Some(device)) => device,
            Ok(None) => continue,
            Err(e) => {
                warn!(device = %name, error = %e, "device lookup failed during release");
                continue;
            }
        };
        if device.is_owned() && !device.is_owned_by(&claim.namespace, &claim.name) {
            debug!(device = %name, owner = %device.claim_ref, "device held by another claim, skipping");
            continue;
        }
        device.release();
        match store.update_device(&device) {
            Ok(()) => released.push(name.clone()),
            Err(e) => warn!(device = %name, error = %e, "device release failed"),
        }
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use devclaim_state::{Device, StateStore, Workload};

    fn bound_claim(devices: &[&str]) -> Claim {
        let mut c = Claim::new("ml", "c1");
        c.device_class = "gpu".into();
        c.desired_count = devices.len() as u32;
        c.explicit_device_names = devices.iter().map(|d| d.to_string()).collect();
        c.phase = ClaimPhase::Bound;
        c.bound_workload_name = "train".into();
        c
    }

    fn bound_device(name: &str) -> Device {
        let mut d = Device::new(name, "gpu");
        d.assign("ml", "c1", DevicePhase::Bound);
        d
    }

    #[test]
    fn deleted_workload_resets_claim_and_frees_devices() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_device(&bound_device("d1")).unwrap();
        store.put_device(&bound_device("d2")).unwrap();
        store.put_claim(&bound_claim(&["d1", "d2"])).unwrap();

        let report = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert!(report.reset);
        assert!(report.persisted);
        assert_eq!(report.released, ["d1", "d2"]);

        let claim = store.get_claim("ml", "c1").unwrap().unwrap();
        assert_eq!(claim.phase, ClaimPhase::Unset);
        assert!(claim.explicit_device_names.is_empty());
        assert!(claim.bound_workload_name.is_empty());
        for name in ["d1", "d2"] {
            let d = store.get_device(name).unwrap().unwrap();
            assert_eq!(d.phase, DevicePhase::Available);
            assert!(!d.is_owned());
        }
    }

    #[test]
    fn release_skips_devices_held_by_other_claims() {
        let store = StateStore::open_in_memory().unwrap();
        let mut other = Device::new("d1", "gpu");
        other.assign("ml", "c2", DevicePhase::Bound);
        store.put_device(&other).unwrap();
        store.put_claim(&bound_claim(&["d1"])).unwrap();

        let report = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert!(report.released.is_empty());
        assert!(store.get_device("d1").unwrap().unwrap().is_owned_by("ml", "c2"));
    }

    #[test]
    fn live_workload_keeps_binding() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_device(&bound_device("d1")).unwrap();
        store.put_claim(&bound_claim(&["d1"])).unwrap();
        store.put_workload(&Workload::new("ml", "train", "u")).unwrap();

        let report = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert_eq!(report, ClaimSyncReport::default());
    }

    #[test]
    fn bound_without_workload_reference_resets() {
        let store = StateStore::open_in_memory().unwrap();
        let mut c = bound_claim(&["d1"]);
        c.bound_workload_name.clear();
        store.put_claim(&c).unwrap();

        store.put_device(&bound_device("d1")).unwrap();

        let report = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert!(report.reset);
        assert_eq!(report.released, ["d1"]);
        let claim = store.get_claim("ml", "c1").unwrap().unwrap();
        assert_eq!(claim.phase, ClaimPhase::Unset);
        assert!(claim.explicit_device_names.is_empty());

        let d = store.get_device("d1").unwrap().unwrap();
        assert_eq!(d.phase, DevicePhase::Available);
        assert!(!d.is_owned());
    }

    #[test]
    fn missing_device_marks_lost_then_recovers() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_device(&bound_device("d1")).unwrap();
        store.put_claim(&bound_claim(&["d1", "d2"])).unwrap();
        store.put_workload(&Workload::new("ml", "train", "u")).unwrap();

        let report = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert_eq!(report.lost_device.as_deref(), Some("d2"));
        let claim = store.get_claim("ml", "c1").unwrap().unwrap();
        assert_eq!(claim.phase, ClaimPhase::Lost);
        assert!(claim.reason.contains("d2"));

        store.put_device(&bound_device("d2")).unwrap();
        let report = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert!(report.lost_cleared);
        let claim = store.get_claim("ml", "c1").unwrap().unwrap();
        assert_eq!(claim.phase, ClaimPhase::Bound);
        assert!(claim.reason.is_empty());
    }

    #[test]
    fn available_device_under_bound_claim_is_rebound() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_device(&Device::new("d1", "gpu")).unwrap();
        store.put_claim(&bound_claim(&["d1"])).unwrap();
        store.put_workload(&Workload::new("ml", "train", "u")).unwrap();

        let report = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert_eq!(report.rebound, ["d1"]);
        assert!(!report.persisted);
        let d = store.get_device("d1").unwrap().unwrap();
        assert_eq!(d.phase, DevicePhase::Bound);
        assert!(d.is_owned_by("ml", "c1"));
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_device(&bound_device("d1")).unwrap();
        store.put_claim(&bound_claim(&["d1"])).unwrap();

        sync_claim(&store, "ml/c1").unwrap();
        let again = sync_claim(&store, "ml/c1").unwrap().unwrap();
        assert_eq!(again, ClaimSyncReport::default());
    }

    #[test]
    fn absent_claim_and_bad_key() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(sync_claim(&store, "ml/ghost").unwrap().is_none());
        assert!(matches!(
            sync_claim(&store, "no-slash"),
            Err(ControllerError::InvalidKey(_))
        ));
    }
}
