//! Watch events emitted by the object store.
//!
//! Each watched type has a dispatch function that turns an event into the
//! stable work-queue key for the object, unwrapping delete tombstones.
//! Dispatch is pure: no lookups, no business logic.

use crate::types::{Claim, Device, Host, Workload};

/// A change to one object.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Updated(T),
    Deleted(DeletedObject<T>),
}

/// The payload of a delete notification.
///
/// A watcher that missed the final state of an object receives a
/// tombstone carrying only the key and whatever state was last seen.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletedObject<T> {
    Known(T),
    Tombstone { key: String, last_known: Option<T> },
}

impl<T> DeletedObject<T> {
    /// The deleted object, if its last state is known.
    pub fn object(&self) -> Option<&T> {
        match self {
            DeletedObject::Known(obj) => Some(obj),
            DeletedObject::Tombstone { last_known, .. } => last_known.as_ref(),
        }
    }
}

/// Any store change, tagged by object type.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Claim(WatchEvent<Claim>),
    Device(WatchEvent<Device>),
    Host(WatchEvent<Host>),
    Workload(WatchEvent<Workload>),
}

/// Stable queue key of a stored object.
pub trait ObjectKey {
    fn object_key(&self) -> String;
}

impl ObjectKey for Claim {
    fn object_key(&self) -> String {
        self.table_key()
    }
}

impl ObjectKey for Device {
    fn object_key(&self) -> String {
        self.table_key()
    }
}

impl ObjectKey for Host {
    fn object_key(&self) -> String {
        self.table_key()
    }
}

impl ObjectKey for Workload {
    fn object_key(&self) -> String {
        self.table_key()
    }
}

impl<T> WatchEvent<T> {
    pub fn is_delete(&self) -> bool {
        matches!(self, WatchEvent::Deleted(_))
    }

    /// The object carried by the event, if any.
    pub fn object(&self) -> Option<&T> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Updated(obj) => Some(obj),
            WatchEvent::Deleted(deleted) => deleted.object(),
        }
    }
}

fn event_key<T: ObjectKey>(event: &WatchEvent<T>) -> String {
    match event {
        WatchEvent::Added(obj) | WatchEvent::Updated(obj) => obj.object_key(),
        WatchEvent::Deleted(DeletedObject::Known(obj)) => obj.object_key(),
        WatchEvent::Deleted(DeletedObject::Tombstone { key, .. }) => key.clone(),
    }
}

/// Queue key (`{namespace}/{name}`) for a claim event.
pub fn claim_event_key(event: &WatchEvent<Claim>) -> String {
    event_key(event)
}

/// Queue key (device name) for a device event.
pub fn device_event_key(event: &WatchEvent<Device>) -> String {
    event_key(event)
}

/// Queue key (host name) for a host event.
pub fn host_event_key(event: &WatchEvent<Host>) -> String {
    event_key(event)
}

/// Queue key (`{namespace}/{name}`) for a workload event.
pub fn workload_event_key(event: &WatchEvent<Workload>) -> String {
    event_key(event)
}
