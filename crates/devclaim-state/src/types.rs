//! Domain types for the devclaim object store.
//!
//! These types mirror the orchestrator objects the allocator works with:
//! device claims (namespaced), devices (cluster-scoped), hosts and
//! workloads. All types serialize to camelCase JSON, both for storage in
//! redb tables and for the inventory files the daemon imports.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute map carried by a device and matched by selectors.
pub type Attributes = HashMap<String, String>;

// ── Phases ─────────────────────────────────────────────────────────

/// Coarse lifecycle state of a claim.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClaimPhase {
    /// Never allocated, or reset by reconciliation.
    #[default]
    #[serde(rename = "")]
    Unset,
    /// Devices chosen by the allocator, waiting for the binder.
    Pending,
    /// Devices committed to a workload.
    Bound,
    /// A named device no longer exists.
    Lost,
}

/// Coarse lifecycle state of a device.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DevicePhase {
    #[default]
    Available,
    Pending,
    Bound,
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClaimPhase::Unset => "Unset",
            ClaimPhase::Pending => "Pending",
            ClaimPhase::Bound => "Bound",
            ClaimPhase::Lost => "Lost",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for DevicePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DevicePhase::Available => "Available",
            DevicePhase::Pending => "Pending",
            DevicePhase::Bound => "Bound",
        };
        f.write_str(s)
    }
}

// ── Selector ───────────────────────────────────────────────────────

/// Conjunction of exact-match labels and set-based expressions.
///
/// An empty selector matches every attribute set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Selector {
    pub match_labels: HashMap<String, String>,
    pub match_expressions: Vec<SelectorRequirement>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn with_expression(mut self, requirement: SelectorRequirement) -> Self {
        self.match_expressions.push(requirement);
        self
    }
}

/// One set-based expression. The operator is kept as written so that a
/// malformed selector can be stored and rejected at match time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorRequirement {
    pub key: String,
    /// One of `In`, `NotIn`, `Exists`, `DoesNotExist`.
    pub operator: String,
    pub values: Vec<String>,
}

impl SelectorRequirement {
    pub fn new(key: impl Into<String>, operator: impl Into<String>, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

// ── Claim ──────────────────────────────────────────────────────────

/// A workload's declared need for specialized devices.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Claim {
    pub name: String,
    pub namespace: String,
    /// Device class, e.g. `nvidia.com/gpu`.
    pub device_class: String,
    /// Zero means "exactly the explicitly named devices".
    pub desired_count: u32,
    /// Ordered device names; grows as the allocator fills count requests.
    pub explicit_device_names: Vec<String>,
    pub selector: Selector,
    pub phase: ClaimPhase,
    /// Workload the claim is bound to; empty when unbound.
    pub bound_workload_name: String,
    pub message: String,
    pub reason: String,
}

impl Claim {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Composite key: `{namespace}/{name}`.
    pub fn table_key(&self) -> String {
        claim_key(&self.namespace, &self.name)
    }

    /// Neither a count nor explicit names: nothing to allocate.
    pub fn is_empty_request(&self) -> bool {
        self.desired_count == 0 && self.explicit_device_names.is_empty()
    }

    /// Whether the claim currently names `device`.
    pub fn names_device(&self, device: &str) -> bool {
        self.explicit_device_names.iter().any(|n| n == device)
    }

    /// Drop every allocation field and return to the unallocated state.
    pub fn reset_binding(&mut self) {
        self.phase = ClaimPhase::Unset;
        self.explicit_device_names.clear();
        self.bound_workload_name.clear();
        self.message.clear();
        self.reason.clear();
    }
}

/// Build the composite claim key.
pub fn claim_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

// ── Device ─────────────────────────────────────────────────────────

/// One allocatable unit of specialized hardware.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    /// Globally unique.
    pub name: String,
    pub device_class: String,
    /// Eligible hosts. Empty means any host that lists the device.
    pub host_affinity: Vec<String>,
    pub attributes: Attributes,
    /// Name of the reserving or bound claim; empty when free.
    pub claim_ref: String,
    pub claim_namespace: String,
    pub phase: DevicePhase,
    pub capacity: Option<String>,
    pub allocatable: Option<String>,
    pub message: String,
    pub reason: String,
}

impl Device {
    pub fn new(name: impl Into<String>, device_class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_class: device_class.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_phase(mut self, phase: DevicePhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn table_key(&self) -> String {
        self.name.clone()
    }

    /// Whether a claim reference is set.
    pub fn is_owned(&self) -> bool {
        !self.claim_ref.is_empty()
    }

    /// Whether the device's owner fields point at the given claim.
    pub fn is_owned_by(&self, namespace: &str, claim: &str) -> bool {
        self.claim_ref == claim && self.claim_namespace == namespace
    }

    /// Whether host affinity admits `host`.
    pub fn admits_host(&self, host: &str) -> bool {
        self.host_affinity.is_empty() || self.host_affinity.iter().any(|h| h == host)
    }

    /// Stamp ownership by a claim and move to `phase`.
    pub fn assign(&mut self, namespace: &str, claim: &str, phase: DevicePhase) {
        self.claim_ref = claim.to_string();
        self.claim_namespace = namespace.to_string();
        self.phase = phase;
    }

    /// Free the device: Available, no owner, no status text.
    pub fn release(&mut self) {
        self.phase = DevicePhase::Available;
        self.claim_ref.clear();
        self.claim_namespace.clear();
        self.message.clear();
        self.reason.clear();
    }
}

// ── Host ───────────────────────────────────────────────────────────

/// Readiness condition value reported for a host.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A scheduling target machine. Managed externally; read-mostly here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Host {
    pub name: String,
    pub ready: ConditionStatus,
    pub terminated: bool,
    /// Device names this host makes allocatable, in allocation order.
    pub allocatable_devices: Vec<String>,
}

impl Host {
    pub fn new(name: impl Into<String>, devices: &[&str]) -> Self {
        Self {
            name: name.into(),
            ready: ConditionStatus::True,
            terminated: false,
            allocatable_devices: devices.iter().map(|d| d.to_string()).collect(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready == ConditionStatus::True
    }

    pub fn table_key(&self) -> String {
        self.name.clone()
    }
}

// ── Workload ───────────────────────────────────────────────────────

/// A schedulable unit that declares claims by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    /// Claim names in the workload's namespace, in declaration order.
    pub claim_names: Vec<String>,
    /// Bound host; empty until a bind submission succeeds.
    pub host: String,
}

impl Workload {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn with_claim(mut self, claim: impl Into<String>) -> Self {
        self.claim_names.push(claim.into());
        self
    }

    pub fn table_key(&self) -> String {
        claim_key(&self.namespace, &self.name)
    }
}

/// A workload-to-host binding submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Binding {
    pub workload_name: String,
    pub workload_namespace: String,
    pub workload_uid: String,
    pub target_host: String,
}

// ── Inventory ──────────────────────────────────────────────────────

/// A bulk set of objects, as loaded by the daemon's import command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Inventory {
    pub claims: Vec<Claim>,
    pub devices: Vec<Device>,
    pub hosts: Vec<Host>,
    pub workloads: Vec<Workload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_phase_serializes_as_empty_string() {
        let json = serde_json::to_string(&ClaimPhase::Unset).unwrap();
        assert_eq!(json, "\"\"");
        let back: ClaimPhase = serde_json::from_str("\"Bound\"").unwrap();
        assert_eq!(back, ClaimPhase::Bound);
    }

    #[test]
    fn claim_defaults_fill_missing_fields() {
        let claim: Claim = serde_json::from_str(
            r#"{"name":"c1","namespace":"ml","deviceClass":"nvidia.com/gpu","desiredCount":2}"#,
        )
        .unwrap();
        assert_eq!(claim.table_key(), "ml/c1");
        assert_eq!(claim.phase, ClaimPhase::Unset);
        assert!(claim.selector.is_empty());
        assert!(!claim.is_empty_request());
    }

    #[test]
    fn empty_request_detected() {
        let claim = Claim::new("ml", "c1");
        assert!(claim.is_empty_request());
    }

    #[test]
    fn reset_binding_clears_allocation() {
        let mut claim = Claim::new("ml", "c1");
        claim.explicit_device_names = vec!["d1".into()];
        claim.phase = ClaimPhase::Bound;
        claim.bound_workload_name = "train".into();
        claim.reason = "bound".into();

        claim.reset_binding();
        assert_eq!(claim.phase, ClaimPhase::Unset);
        assert!(claim.explicit_device_names.is_empty());
        assert!(claim.bound_workload_name.is_empty());
        assert!(claim.reason.is_empty());
    }

    #[test]
    fn device_release_clears_owner_and_status() {
        let mut dev = Device::new("d1", "nvidia.com/gpu");
        dev.assign("ml", "c1", DevicePhase::Bound);
        dev.message = "host h1 is not ready".into();
        assert!(dev.is_owned_by("ml", "c1"));

        dev.release();
        assert_eq!(dev.phase, DevicePhase::Available);
        assert!(!dev.is_owned());
        assert!(dev.message.is_empty());
    }

    #[test]
    fn host_affinity() {
        let mut dev = Device::new("d1", "gpu");
        assert!(dev.admits_host("h1"));
        dev.host_affinity = vec!["h2".into()];
        assert!(!dev.admits_host("h1"));
        assert!(dev.admits_host("h2"));
    }
}
