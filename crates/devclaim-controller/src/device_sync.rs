//! One pass of the device loop over a single device.

use devclaim_state::{Claim, ClaimPhase, Device, DevicePhase, ObjectStore};
use tracing::{debug, info};

use crate::error::ControllerResult;

/// Outcome of a device sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    /// The device no longer exists.
    Missing,
    /// No owner recorded.
    Unowned,
    /// Owner exists and lists the device, or holds it as an uncommitted
    /// filter reservation.
    Consistent,
    /// Released because the owner claim does not exist.
    ReleasedOrphan,
    /// Released because the owner claim does not list the device.
    ReleasedUnlisted,
}

/// Reconcile the device stored under `name` against its owner claim.
pub fn sync_device(store: &dyn ObjectStore, name: &str) -> ControllerResult<DeviceAction> {
    let Some(mut device) = store.get_device(name)? else {
        return Ok(DeviceAction::Missing);
    };
    if !device.is_owned() {
        return Ok(DeviceAction::Unowned);
    }

    let owner = store.get_claim(&device.claim_namespace, &device.claim_ref)?;
    let action = match owner {
        None => DeviceAction::ReleasedOrphan,
        Some(claim) if !claim.names_device(name) && !is_inflight_reservation(&claim, &device) => {
            DeviceAction::ReleasedUnlisted
        }
        Some(_) => return Ok(DeviceAction::Consistent),
    };

    info!(
        device = %name,
        claim = %format!("{}/{}", device.claim_namespace, device.claim_ref),
        ?action,
        "releasing device"
    );
    device.release();
    store.update_device(&device)?;
    debug!(device = %name, "device available");
    Ok(action)
}

/// A filter reserves devices Pending before it persists the claim's names,
/// so an unset claim may legitimately own a Pending device it does not list.
fn is_inflight_reservation(claim: &Claim, device: &Device) -> bool {
    claim.phase == ClaimPhase::Unset && device.phase != DevicePhase::Bound
}
