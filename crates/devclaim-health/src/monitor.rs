//! Host health monitor: background task that quarantines devices on
//! broken hosts.
//!
//! Keeps a local cache of hosts, bootstrapped once from a full listing
//! before any watch event is consumed. Cached hosts that are deleted from
//! the store, terminated, or not ready past the debounce window have every
//! device they list set to Pending. A host leaves the cache only after its
//! quarantine succeeds; a failed quarantine is retried on a later pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use devclaim_state::watch::host_event_key;
use devclaim_state::{DevicePhase, Host, ObjectStore, StoreEvent, WorkQueue};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{HealthError, HealthResult};
use crate::tracker::{HostVerdict, SuspectTracker};

/// Reason stamped on quarantined devices.
pub const HOST_NOT_READY_REASON: &str = "HostNotReady";

/// Monitor timing and retry limits.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Continuous not-ready time before a host is broken.
    pub not_ready_threshold: Duration,
    /// Attempts per quarantine batch.
    pub quarantine_attempts: u32,
    /// Pause between quarantine attempts.
    pub quarantine_retry_delay: Duration,
    /// Delay before re-checking a suspect host or retrying a failed quarantine.
    pub requeue_delay: Duration,
    /// Period of the full re-enqueue of cached hosts.
    pub resync_interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            not_ready_threshold: Duration::from_secs(120),
            quarantine_attempts: 5,
            quarantine_retry_delay: Duration::from_millis(5),
            requeue_delay: Duration::from_secs(10),
            resync_interval: Duration::from_secs(30),
        }
    }
}

impl HealthMonitorConfig {
    pub fn with_not_ready_threshold(mut self, threshold: Duration) -> Self {
        self.not_ready_threshold = threshold;
        self
    }

    pub fn with_quarantine_attempts(mut self, attempts: u32) -> Self {
        self.quarantine_attempts = attempts.max(1);
        self
    }

    pub fn with_quarantine_retry_delay(mut self, delay: Duration) -> Self {
        self.quarantine_retry_delay = delay;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }
}

/// What one pass over a host key did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    Healthy,
    /// Not ready, still inside the debounce window.
    Suspect,
    /// Devices quarantined and host dropped from the cache.
    Quarantined,
    /// Quarantine exhausted its attempts; re-enqueued.
    QuarantineFailed,
    /// Deleted host that was never cached, or already handled.
    Untracked,
    /// Host lookup failed; re-enqueued.
    Retry,
}

pub struct HostHealthMonitor {
    store: Arc<dyn ObjectStore>,
    config: HealthMonitorConfig,
    cache: HashMap<String, Host>,
    tracker: SuspectTracker,
    queue: WorkQueue,
}

impl HostHealthMonitor {
    pub fn new(store: Arc<dyn ObjectStore>, config: HealthMonitorConfig) -> Self {
        let tracker = SuspectTracker::new(config.not_ready_threshold);
        Self {
            store,
            config,
            cache: HashMap::new(),
            tracker,
            queue: WorkQueue::new(),
        }
    }

    /// Fill the cache from a full host listing and enqueue every host.
    pub async fn bootstrap(&mut self) -> HealthResult<usize> {
        let hosts = self.store.list_hosts()?;
        let count = hosts.len();
        for host in hosts {
            self.queue.add(host.name.clone()).await;
            self.cache.insert(host.name.clone(), host);
        }
        info!(hosts = count, "host cache bootstrapped");
        Ok(count)
    }

    pub fn is_cached(&self, host: &str) -> bool {
        self.cache.contains_key(host)
    }

    pub fn is_suspect(&self, host: &str) -> bool {
        self.tracker.is_suspect(host)
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> HealthResult<()> {
        let mut events = self.store.subscribe();
        self.bootstrap().await?;

        let queue = self.queue.clone();
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.tick().await;

        info!(threshold = ?self.config.not_ready_threshold, "host health monitor started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(StoreEvent::Host(ev)) => queue.add(host_event_key(&ev)).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "host watch lagged, resyncing");
                        self.resync_from_store().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("host watch closed");
                        break;
                    }
                },
                _ = resync.tick() => self.enqueue_cached().await,
                Some(key) = queue.get() => {
                    self.process_at(&key, Instant::now()).await;
                    queue.done(&key).await;
                }
            }
        }

        queue.shut_down().await;
        info!("host health monitor stopped");
        Ok(())
    }

    async fn enqueue_cached(&self) {
        debug!(hosts = self.cache.len(), "host resync");
        for name in self.cache.keys() {
            self.queue.add(name.clone()).await;
        }
    }

    /// Enqueue cached hosts and any host the cache has not seen, after
    /// watch events were dropped.
    async fn resync_from_store(&self) {
        self.enqueue_cached().await;
        match self.store.list_hosts() {
            Ok(hosts) => {
                for host in hosts {
                    self.queue.add(host.name).await;
                }
            }
            Err(e) => warn!(error = %e, "failed to list hosts for resync"),
        }
    }

    /// Process one host key as if observed at `now`.
    pub async fn process_at(&mut self, key: &str, now: Instant) -> HostOutcome {
        match self.store.get_host(key) {
            Ok(Some(host)) => self.observe(host, now).await,
            Ok(None) => self.handle_deleted(key).await,
            Err(e) => {
                warn!(host = %key, error = %e, "host lookup failed");
                self.queue.add_after(key, self.config.requeue_delay);
                HostOutcome::Retry
            }
        }
    }

    async fn observe(&mut self, host: Host, now: Instant) -> HostOutcome {
        let name = host.name.clone();
        self.cache.insert(name.clone(), host.clone());

        match self.tracker.observe(&host, now) {
            HostVerdict::Healthy => HostOutcome::Healthy,
            HostVerdict::Suspect => {
                self.queue.add_after(name, self.config.requeue_delay);
                HostOutcome::Suspect
            }
            HostVerdict::Broken => {
                info!(host = %name, terminated = host.terminated, "host broken");
                self.quarantine_and_forget(&host).await
            }
        }
    }

    async fn handle_deleted(&mut self, key: &str) -> HostOutcome {
        let Some(host) = self.cache.get(key).cloned() else {
            debug!(host = %key, "deletion already processed");
            return HostOutcome::Untracked;
        };
        info!(host = %key, "host deleted");
        self.quarantine_and_forget(&host).await
    }

    async fn quarantine_and_forget(&mut self, host: &Host) -> HostOutcome {
        match self.quarantine(host).await {
            Ok(()) => {
                self.cache.remove(&host.name);
                self.tracker.clear(&host.name);
                info!(host = %host.name, devices = host.allocatable_devices.len(), "devices quarantined");
                HostOutcome::Quarantined
            }
            Err(e) => {
                warn!(host = %host.name, error = %e, "quarantine failed, re-enqueueing");
                self.queue.add_after(host.name.clone(), self.config.requeue_delay);
                HostOutcome::QuarantineFailed
            }
        }
    }

    /// Mark every device of `host` Pending, retrying the whole batch.
    async fn quarantine(&self, host: &Host) -> HealthResult<()> {
        let attempts = self.config.quarantine_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.mark_devices(host) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(host = %host.name, attempt, error = %e, "quarantine attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.quarantine_retry_delay).await;
            }
        }
        Err(HealthError::QuarantineFailed {
            host: host.name.clone(),
            attempts,
            last_error,
        })
    }

    /// One batch pass. Keeps going past failures and reports the last one.
    fn mark_devices(&self, host: &Host) -> HealthResult<()> {
        let message = format!("host {} is not ready", host.name);
        let mut failure = None;
        for name in &host.allocatable_devices {
            let mut device = match self.store.get_device(name) {
                Ok(Some(device)) => device,
                Ok(None) => continue,
                Err(e) => {
                    failure = Some(e);
                    continue;
                }
            };
            device.phase = DevicePhase::Pending;
            device.message = message.clone();
            device.reason = HOST_NOT_READY_REASON.to_string();
            if let Err(e) = self.store.update_device(&device) {
                failure = Some(e);
            }
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
