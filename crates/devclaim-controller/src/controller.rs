//! Reconcile controller: runs the claim and device loops.
//!
//! One watch subscription feeds two work queues. Each queue has a single
//! worker, so a loop never processes two items at once, while the two loops
//! run concurrently with each other and with allocator requests. A periodic
//! resync re-enqueues every claim and device; a lagged watch triggers the
//! same resync immediately.

use std::sync::Arc;
use std::time::Duration;

use devclaim_state::watch::{claim_event_key, device_event_key, workload_event_key};
use devclaim_state::{ObjectStore, StoreEvent, WatchEvent, WorkQueue};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::claim_sync::{split_key, sync_claim};
use crate::device_sync::sync_device;

/// Controller timing.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Full re-enqueue period.
    pub resync_interval: Duration,
    /// Delay before retrying an item whose sync failed.
    pub retry_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ControllerConfig {
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

pub struct ReconcileController {
    store: Arc<dyn ObjectStore>,
    config: ControllerConfig,
    claim_queue: WorkQueue,
    device_queue: WorkQueue,
}

impl ReconcileController {
    pub fn new(store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Self {
        Self {
            store,
            config,
            claim_queue: WorkQueue::new(),
            device_queue: WorkQueue::new(),
        }
    }

    /// Run both loops until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        // Subscribe before listing so nothing between the two is missed.
        let mut events = self.store.subscribe();
        self.enqueue_all().await;

        let claim_worker = tokio::spawn(claim_worker(
            self.store.clone(),
            self.claim_queue.clone(),
            self.config.retry_delay,
        ));
        let device_worker = tokio::spawn(device_worker(
            self.store.clone(),
            self.device_queue.clone(),
            self.config.retry_delay,
        ));

        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.tick().await;

        info!(resync = ?self.config.resync_interval, "reconcile controller started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.route(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "watch lagged, resyncing");
                        self.enqueue_all().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("watch stream closed");
                        break;
                    }
                },
                _ = resync.tick() => {
                    debug!("periodic resync");
                    self.enqueue_all().await;
                }
            }
        }

        self.claim_queue.shut_down().await;
        self.device_queue.shut_down().await;
        for (name, handle) in [("claim", claim_worker), ("device", device_worker)] {
            if let Err(e) = handle.await {
                error!(worker = name, error = %e, "worker panicked");
            }
        }
        info!("reconcile controller stopped");
    }

    async fn route(&self, event: StoreEvent) {
        match event {
            StoreEvent::Claim(ev) => self.claim_queue.add(claim_event_key(&ev)).await,
            StoreEvent::Device(ev) => self.device_queue.add(device_event_key(&ev)).await,
            StoreEvent::Workload(ev @ WatchEvent::Deleted(_)) => {
                self.enqueue_claims_of_workload(&workload_event_key(&ev)).await
            }
            StoreEvent::Workload(_) | StoreEvent::Host(_) => {}
        }
    }

    /// Enqueue every claim bound to the deleted workload.
    async fn enqueue_claims_of_workload(&self, workload_key: &str) {
        let Ok((namespace, name)) = split_key(workload_key) else {
            return;
        };
        match self.store.list_claims() {
            Ok(claims) => {
                for claim in claims
                    .iter()
                    .filter(|c| c.namespace == namespace && c.bound_workload_name == name)
                {
                    self.claim_queue.add(claim.table_key()).await;
                }
            }
            Err(e) => warn!(workload = %workload_key, error = %e, "failed to list claims"),
        }
    }

    async fn enqueue_all(&self) {
        match self.store.list_claims() {
            Ok(claims) => {
                for claim in claims {
                    self.claim_queue.add(claim.table_key()).await;
                }
            }
            Err(e) => warn!(error = %e, "failed to list claims for resync"),
        }
        match self.store.list_devices() {
            Ok(devices) => {
                for device in devices {
                    self.device_queue.add(device.name).await;
                }
            }
            Err(e) => warn!(error = %e, "failed to list devices for resync"),
        }
    }
}

async fn claim_worker(store: Arc<dyn ObjectStore>, queue: WorkQueue, retry: Duration) {
    while let Some(key) = queue.get().await {
        match sync_claim(store.as_ref(), &key) {
            Ok(Some(report)) if report.persisted || !report.released.is_empty() => {
                debug!(claim = %key, ?report, "claim synced")
            }
            Ok(_) => {}
            Err(e) => {
                warn!(claim = %key, error = %e, "claim sync failed, retrying");
                queue.add_after(key.clone(), retry);
            }
        }
        queue.done(&key).await;
    }
}

async fn device_worker(store: Arc<dyn ObjectStore>, queue: WorkQueue, retry: Duration) {
    while let Some(key) = queue.get().await {
        if let Err(e) = sync_device(store.as_ref(), &key) {
            warn!(device = %key, error = %e, "device sync failed, retrying");
            queue.add_after(key.clone(), retry);
        }
        queue.done(&key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devclaim_state::{Claim, ClaimPhase, Device, DevicePhase, StateStore, Workload};

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn start(store: &StateStore) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let controller = ReconcileController::new(
            Arc::new(store.clone()),
            ControllerConfig::default().with_retry_delay(Duration::from_millis(20)),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { controller.run(rx).await });
        (tx, handle)
    }

    #[tokio::test]
    async fn workload_delete_releases_devices() {
        let store = StateStore::open_in_memory().unwrap();
        let mut d = Device::new("d1", "gpu");
        d.assign("ml", "c1", DevicePhase::Bound);
        store.put_device(&d).unwrap();
        let mut c = Claim::new("ml", "c1");
        c.desired_count = 1;
        c.explicit_device_names = vec!["d1".into()];
        c.phase = ClaimPhase::Bound;
        c.bound_workload_name = "train".into();
        store.put_claim(&c).unwrap();
        store.put_workload(&Workload::new("ml", "train", "u")).unwrap();

        let (tx, handle) = start(&store);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            store.get_claim("ml", "c1").unwrap().unwrap().phase,
            ClaimPhase::Bound
        );

        store.delete_workload("ml", "train").unwrap();
        assert!(
            eventually(|| {
                store.get_device("d1").unwrap().unwrap().phase == DevicePhase::Available
                    && store.get_claim("ml", "c1").unwrap().unwrap().phase == ClaimPhase::Unset
            })
            .await
        );

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn startup_sync_frees_orphans() {
        let store = StateStore::open_in_memory().unwrap();
        let mut d = Device::new("d1", "gpu");
        d.assign("ml", "gone", DevicePhase::Pending);
        store.put_device(&d).unwrap();

        let (tx, handle) = start(&store);
        assert!(eventually(|| !store.get_device("d1").unwrap().unwrap().is_owned()).await);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_loops() {
        let store = StateStore::open_in_memory().unwrap();
        let (tx, handle) = start(&store);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
