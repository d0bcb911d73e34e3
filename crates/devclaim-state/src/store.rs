//! StateStore: redb-backed object store for devclaim.
//!
//! Provides typed CRUD over claims, devices, hosts and workloads, JSON
//! values in redb's `&[u8]` columns, and a broadcast watch stream of every
//! change. Backs the daemon in standalone mode and every test that needs a
//! store; supports both on-disk and in-memory backends.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::object_store::ObjectStore;
use crate::tables::*;
use crate::types::*;
use crate::watch::{DeletedObject, StoreEvent, WatchEvent};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Watch channel depth. A subscriber that falls further behind than this
/// observes `RecvError::Lagged` and must resync.
const EVENT_CAPACITY: usize = 1024;

/// Whether a write must find an existing row.
#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Upsert,
    ExistingOnly,
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "object store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory object store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db: Arc::new(db),
            events,
        }
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLAIMS).map_err(map_err!(Table))?;
        txn.open_table(DEVICES).map_err(map_err!(Table))?;
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    /// Write `value` under `key`. Returns whether a row already existed.
    fn write_json<T: Serialize>(
        &self,
        table: JsonTable,
        key: &str,
        value: &T,
        mode: WriteMode,
    ) -> StateResult<bool> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.get(key).map_err(map_err!(Read))?.is_some();
            if !existed && mode == WriteMode::ExistingOnly {
                return Err(StateError::not_found(table.name(), key));
            }
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn read_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, table: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    /// Remove `key`, returning the last stored value.
    fn remove_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let guard = t.remove(key).map_err(map_err!(Write))?;
            match guard {
                Some(g) => Some(serde_json::from_slice(g.value()).map_err(map_err!(Deserialize))?),
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    fn changed<T>(existed: bool, obj: T) -> WatchEvent<T> {
        if existed {
            WatchEvent::Updated(obj)
        } else {
            WatchEvent::Added(obj)
        }
    }

    // ── Claims ─────────────────────────────────────────────────────

    /// Insert or replace a claim.
    pub fn put_claim(&self, claim: &Claim) -> StateResult<()> {
        let key = claim.table_key();
        let existed = self.write_json(CLAIMS, &key, claim, WriteMode::Upsert)?;
        debug!(%key, existed, "claim stored");
        self.emit(StoreEvent::Claim(Self::changed(existed, claim.clone())));
        Ok(())
    }

    /// Delete a claim. Returns true if it existed.
    pub fn delete_claim(&self, namespace: &str, name: &str) -> StateResult<bool> {
        let key = claim_key(namespace, name);
        let removed: Option<Claim> = self.remove_json(CLAIMS, &key)?;
        debug!(%key, existed = removed.is_some(), "claim deleted");
        Ok(match removed {
            Some(claim) => {
                self.emit(StoreEvent::Claim(WatchEvent::Deleted(DeletedObject::Known(claim))));
                true
            }
            None => false,
        })
    }

    // ── Devices ────────────────────────────────────────────────────

    /// Insert or replace a device.
    pub fn put_device(&self, device: &Device) -> StateResult<()> {
        let key = device.table_key();
        let existed = self.write_json(DEVICES, &key, device, WriteMode::Upsert)?;
        debug!(%key, existed, "device stored");
        self.emit(StoreEvent::Device(Self::changed(existed, device.clone())));
        Ok(())
    }

    /// Delete a device. Returns true if it existed.
    pub fn delete_device(&self, name: &str) -> StateResult<bool> {
        let removed: Option<Device> = self.remove_json(DEVICES, name)?;
        debug!(key = %name, existed = removed.is_some(), "device deleted");
        Ok(match removed {
            Some(device) => {
                self.emit(StoreEvent::Device(WatchEvent::Deleted(DeletedObject::Known(device))));
                true
            }
            None => false,
        })
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or replace a host.
    pub fn put_host(&self, host: &Host) -> StateResult<()> {
        let key = host.table_key();
        let existed = self.write_json(HOSTS, &key, host, WriteMode::Upsert)?;
        debug!(%key, existed, "host stored");
        self.emit(StoreEvent::Host(Self::changed(existed, host.clone())));
        Ok(())
    }

    /// Delete a host. Returns true if it existed.
    pub fn delete_host(&self, name: &str) -> StateResult<bool> {
        let removed: Option<Host> = self.remove_json(HOSTS, name)?;
        debug!(key = %name, existed = removed.is_some(), "host deleted");
        Ok(match removed {
            Some(host) => {
                self.emit(StoreEvent::Host(WatchEvent::Deleted(DeletedObject::Known(host))));
                true
            }
            None => false,
        })
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or replace a workload.
    pub fn put_workload(&self, workload: &Workload) -> StateResult<()> {
        let key = workload.table_key();
        let existed = self.write_json(WORKLOADS, &key, workload, WriteMode::Upsert)?;
        debug!(%key, existed, "workload stored");
        self.emit(StoreEvent::Workload(Self::changed(existed, workload.clone())));
        Ok(())
    }

    /// List all workloads.
    pub fn list_workloads(&self) -> StateResult<Vec<Workload>> {
        self.list_json(WORKLOADS)
    }

    /// Delete a workload. Returns true if it existed.
    pub fn delete_workload(&self, namespace: &str, name: &str) -> StateResult<bool> {
        let key = claim_key(namespace, name);
        let removed: Option<Workload> = self.remove_json(WORKLOADS, &key)?;
        debug!(%key, existed = removed.is_some(), "workload deleted");
        Ok(match removed {
            Some(workload) => {
                self.emit(StoreEvent::Workload(WatchEvent::Deleted(DeletedObject::Known(
                    workload,
                ))));
                true
            }
            None => false,
        })
    }

    // ── Bulk ───────────────────────────────────────────────────────

    /// Store every object in an inventory. Returns the number written.
    pub fn import(&self, inventory: &Inventory) -> StateResult<usize> {
        for host in &inventory.hosts {
            self.put_host(host)?;
        }
        for device in &inventory.devices {
            self.put_device(device)?;
        }
        for claim in &inventory.claims {
            self.put_claim(claim)?;
        }
        for workload in &inventory.workloads {
            self.put_workload(workload)?;
        }
        Ok(inventory.hosts.len()
            + inventory.devices.len()
            + inventory.claims.len()
            + inventory.workloads.len())
    }
}

impl ObjectStore for StateStore {
    fn get_claim(&self, namespace: &str, name: &str) -> StateResult<Option<Claim>> {
        self.read_json(CLAIMS, &claim_key(namespace, name))
    }

    fn list_claims(&self) -> StateResult<Vec<Claim>> {
        self.list_json(CLAIMS)
    }

    fn update_claim(&self, claim: &Claim) -> StateResult<()> {
        let key = claim.table_key();
        self.write_json(CLAIMS, &key, claim, WriteMode::ExistingOnly)?;
        debug!(%key, phase = %claim.phase, "claim updated");
        self.emit(StoreEvent::Claim(WatchEvent::Updated(claim.clone())));
        Ok(())
    }

    fn get_device(&self, name: &str) -> StateResult<Option<Device>> {
        self.read_json(DEVICES, name)
    }

    fn list_devices(&self) -> StateResult<Vec<Device>> {
        self.list_json(DEVICES)
    }

    fn update_device(&self, device: &Device) -> StateResult<()> {
        let key = device.table_key();
        self.write_json(DEVICES, &key, device, WriteMode::ExistingOnly)?;
        debug!(%key, phase = %device.phase, "device updated");
        self.emit(StoreEvent::Device(WatchEvent::Updated(device.clone())));
        Ok(())
    }

    fn get_host(&self, name: &str) -> StateResult<Option<Host>> {
        self.read_json(HOSTS, name)
    }

    fn list_hosts(&self) -> StateResult<Vec<Host>> {
        self.list_json(HOSTS)
    }

    fn get_workload(&self, namespace: &str, name: &str) -> StateResult<Option<Workload>> {
        self.read_json(WORKLOADS, &claim_key(namespace, name))
    }

    fn bind_workload(&self, binding: &Binding) -> StateResult<()> {
        let key = claim_key(&binding.workload_namespace, &binding.workload_name);
        let mut workload: Workload = self
            .read_json(WORKLOADS, &key)?
            .ok_or_else(|| StateError::not_found(WORKLOADS.name(), key.as_str()))?;
        if !binding.workload_uid.is_empty() && workload.uid != binding.workload_uid {
            return Err(StateError::UidMismatch {
                key,
                stored: workload.uid,
                requested: binding.workload_uid.clone(),
            });
        }
        workload.host = binding.target_host.clone();
        self.write_json(WORKLOADS, &key, &workload, WriteMode::ExistingOnly)?;
        debug!(%key, host = %binding.target_host, "workload bound");
        self.emit(StoreEvent::Workload(WatchEvent::Updated(workload)));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
