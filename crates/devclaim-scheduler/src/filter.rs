//! Allocator: per-request device filtering across candidate hosts.
//!
//! For one workload, each candidate host is evaluated concurrently (bounded
//! fan-out) against the union of the workload's claims:
//!
//! 1. the host must list every explicitly named device, all of them free
//! 2. each count-based claim is filled first-fit from the host's remaining
//!    devices, in the order the host lists them
//! 3. a feasible host gets its newly chosen devices reserved (Pending)
//!
//! When any host is feasible, every claim is persisted Pending with the
//! device list chosen on the first feasible host in candidate order.
//! Reservation writes are blind and racy; reconciliation closes the gaps.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use devclaim_state::{
    Claim, ClaimPhase, Device, DevicePhase, Host, ObjectStore, Workload,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::claims::resolve_claims;
use crate::error::SchedulerResult;
use crate::matcher;

/// Rejection recorded for every host before it is evaluated.
pub const NOT_EVALUATED: &str = "host was not evaluated for device allocation";

/// Reason stamped on claims whose devices were found.
pub const SATISFIED_REASON: &str = "devices satisfied, waiting to bind";

/// Allocator tuning.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Maximum hosts evaluated at once.
    pub parallelism: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { parallelism: 16 }
    }
}

impl FilterConfig {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }
}

/// Result of one filter request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    /// Feasible hosts, in candidate order.
    pub feasible_hosts: Vec<Host>,
    /// Host name → reason it was rejected.
    pub rejected_hosts: BTreeMap<String, String>,
    /// Request-level failure; no host is feasible when set.
    pub error: Option<String>,
    /// Informational note, e.g. why nothing was filtered.
    pub message: Option<String>,
}

impl FilterOutcome {
    pub fn feasible_names(&self) -> Vec<&str> {
        self.feasible_hosts.iter().map(|h| h.name.as_str()).collect()
    }

    fn all_feasible(hosts: Vec<Host>) -> Self {
        Self {
            feasible_hosts: hosts,
            ..Default::default()
        }
    }

    fn failed(hosts: &[Host], error: String) -> Self {
        Self {
            feasible_hosts: Vec::new(),
            rejected_hosts: default_rejections(hosts),
            error: Some(error),
            message: None,
        }
    }
}

fn default_rejections(hosts: &[Host]) -> BTreeMap<String, String> {
    hosts
        .iter()
        .map(|h| (h.name.clone(), NOT_EVALUATED.to_string()))
        .collect()
}

/// Outcome of evaluating one host.
#[derive(Debug)]
enum HostVerdict {
    /// Per-claim device lists, parallel to the claim slice.
    Feasible(Vec<Vec<String>>),
    Rejected(String),
}

/// Results shared by the per-host tasks.
#[derive(Default)]
struct FilterResults {
    feasible: Vec<(usize, Host, Vec<Vec<String>>)>,
    rejected: BTreeMap<String, String>,
}

/// Device filter invoked for each scheduling decision.
#[derive(Clone)]
pub struct Allocator {
    store: Arc<dyn ObjectStore>,
    config: FilterConfig,
}

impl Allocator {
    pub fn new(store: Arc<dyn ObjectStore>, config: FilterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Decide which of `hosts` can satisfy the workload's claims.
    ///
    /// `None` for `hosts` yields an empty result without touching state.
    pub async fn filter(&self, workload: &Workload, hosts: Option<Vec<Host>>) -> FilterOutcome {
        let Some(hosts) = hosts else {
            debug!(workload = %workload.table_key(), "filter called without a host list");
            return FilterOutcome::default();
        };

        let claims = match resolve_claims(self.store.as_ref(), workload) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(workload = %workload.table_key(), error = %e, "claim lookup failed");
                return FilterOutcome::failed(&hosts, e.to_string());
            }
        };

        if claims.is_empty() {
            debug!(workload = %workload.table_key(), "workload declares no claims");
            return FilterOutcome::all_feasible(hosts);
        }

        if let Some(bound) = claims.iter().find(|c| c.phase == ClaimPhase::Bound) {
            let message = format!("claim {} is already bound", bound.table_key());
            debug!(workload = %workload.table_key(), %message, "skipping filter");
            let mut outcome = FilterOutcome::all_feasible(hosts);
            outcome.message = Some(message);
            return outcome;
        }

        let results = self.evaluate_hosts(&hosts, Arc::new(claims.clone())).await;

        let mut feasible = results.feasible;
        feasible.sort_by_key(|(index, _, _)| *index);

        let mut rejected = default_rejections(&hosts);
        for (_, host, _) in &feasible {
            rejected.remove(&host.name);
        }
        rejected.extend(results.rejected);

        if let Some((_, host, lists)) = feasible.first() {
            if let Err(e) = self.persist_claims(claims, lists) {
                warn!(workload = %workload.table_key(), error = %e, "failed to persist claims");
                return FilterOutcome::failed(&hosts, e.to_string());
            }
            info!(
                workload = %workload.table_key(),
                feasible = feasible.len(),
                chosen_lists_from = %host.name,
                "claims satisfied"
            );
        } else {
            info!(workload = %workload.table_key(), "no host can satisfy the claims");
        }

        FilterOutcome {
            feasible_hosts: feasible.into_iter().map(|(_, host, _)| host).collect(),
            rejected_hosts: rejected,
            error: None,
            message: None,
        }
    }

    async fn evaluate_hosts(&self, hosts: &[Host], claims: Arc<Vec<Claim>>) -> FilterResults {
        let required = Arc::new(required_names(&claims));
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let results = Arc::new(Mutex::new(FilterResults::default()));
        let mut tasks = JoinSet::new();

        for (index, host) in hosts.iter().cloned().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let store = self.store.clone();
            let claims = claims.clone();
            let required = required.clone();
            let results = results.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let verdict = evaluate_host(store.as_ref(), &host, &claims, &required);
                let mut shared = results.lock().unwrap_or_else(PoisonError::into_inner);
                match verdict {
                    HostVerdict::Feasible(lists) => shared.feasible.push((index, host, lists)),
                    HostVerdict::Rejected(reason) => {
                        debug!(host = %host.name, %reason, "host rejected");
                        shared.rejected.insert(host.name, reason);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "host evaluation task failed");
            }
        }

        let mut shared = results.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *shared)
    }

    fn persist_claims(&self, claims: Vec<Claim>, lists: &[Vec<String>]) -> SchedulerResult<()> {
        for (mut claim, names) in claims.into_iter().zip(lists) {
            claim.explicit_device_names = names.clone();
            claim.phase = ClaimPhase::Pending;
            claim.reason = SATISFIED_REASON.to_string();
            claim.message.clear();
            self.store.update_claim(&claim)?;
            debug!(claim = %claim.table_key(), devices = ?claim.explicit_device_names, "claim pending");
        }
        Ok(())
    }
}

/// Union of every claim's explicit names, first occurrence order.
fn required_names(claims: &[Claim]) -> Vec<String> {
    let mut seen = HashSet::new();
    claims
        .iter()
        .flat_map(|c| c.explicit_device_names.iter())
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect()
}

/// Whether `device` can be handed to `claim`: free, or already reserved
/// for that same claim by an earlier filter.
fn free_for(device: &Device, claim: &Claim) -> bool {
    match device.phase {
        DevicePhase::Available => true,
        DevicePhase::Pending => device.is_owned_by(&claim.namespace, &claim.name),
        DevicePhase::Bound => false,
    }
}

fn evaluate_host(
    store: &dyn ObjectStore,
    host: &Host,
    claims: &[Claim],
    required: &[String],
) -> HostVerdict {
    // A device listed twice is still one device.
    let mut listed = HashSet::new();
    let allocatable: Vec<&str> = host
        .allocatable_devices
        .iter()
        .map(String::as_str)
        .filter(|name| listed.insert(*name))
        .collect();

    if allocatable.len() < required.len() {
        return HostVerdict::Rejected(format!(
            "host offers {} devices, workload names {}",
            allocatable.len(),
            required.len()
        ));
    }

    let offered: HashSet<&str> = allocatable.iter().copied().collect();
    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|n| !offered.contains(n))
        .collect();
    if !missing.is_empty() {
        return HostVerdict::Rejected(format!("no such devices on this host: [{}]", missing.join(" ")));
    }

    let mut pool = Vec::with_capacity(allocatable.len());
    for &name in &allocatable {
        match store.get_device(name) {
            Ok(Some(device)) => pool.push(device),
            Ok(None) => return HostVerdict::Rejected(format!("device {name} not found")),
            Err(e) => return HostVerdict::Rejected(e.to_string()),
        }
    }

    // Explicitly named devices leave the pool, and must be free for the
    // claim that names them.
    let named_by: HashMap<&str, &Claim> = claims
        .iter()
        .flat_map(|c| c.explicit_device_names.iter().map(move |n| (n.as_str(), c)))
        .collect();
    let mut remaining = Vec::with_capacity(pool.len());
    for device in pool {
        match named_by.get(device.name.as_str()) {
            Some(claim) if !free_for(&device, claim) => {
                return HostVerdict::Rejected(format!(
                    "unavailable explicitly-claimed device {} ({})",
                    device.name, device.phase
                ));
            }
            Some(_) => {}
            None => remaining.push(device),
        }
    }

    let mut lists = Vec::with_capacity(claims.len());
    let mut reservations: Vec<(Device, usize)> = Vec::new();
    for (ci, claim) in claims.iter().enumerate() {
        let mut names = claim.explicit_device_names.clone();
        let wanted = claim.desired_count as usize;
        let mut i = 0;
        while names.len() < wanted && i < remaining.len() {
            let device = &remaining[i];
            let eligible = device.device_class == claim.device_class
                && device.admits_host(&host.name)
                && free_for(device, claim)
                && matcher::matches(&claim.selector, &device.attributes);
            if eligible {
                let device = remaining.remove(i);
                names.push(device.name.clone());
                reservations.push((device, ci));
            } else {
                i += 1;
            }
        }
        if names.len() < wanted {
            return HostVerdict::Rejected(format!(
                "not enough devices on this host to satisfy claim {} (need {}, found {})",
                claim.table_key(),
                wanted,
                names.len()
            ));
        }
        lists.push(names);
    }

    for (mut device, ci) in reservations {
        let claim = &claims[ci];
        device.assign(&claim.namespace, &claim.name, DevicePhase::Pending);
        if let Err(e) = store.update_device(&device) {
            warn!(host = %host.name, device = %device.name, error = %e, "failed to reserve device");
        }
    }

    HostVerdict::Feasible(lists)
}
