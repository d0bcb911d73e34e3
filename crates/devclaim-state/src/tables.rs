//! redb table definitions for the devclaim object store.
//!
//! `&str` keys, `&[u8]` values (JSON). Namespaced objects use
//! `{namespace}/{name}`; cluster-scoped objects use their bare name.

use redb::TableDefinition;

/// Claims keyed by `{namespace}/{name}`.
pub const CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("claims");

/// Devices keyed by `{name}`.
pub const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

/// Hosts keyed by `{name}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Workloads keyed by `{namespace}/{name}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");
