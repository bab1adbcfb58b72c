//! Persistence for service records, the version tag catalog and last activity.
//!
//! Every [`RegistryStore`] method is one atomic unit: it commits fully or leaves
//! no trace. Linearizing operations on the same identity is the registry's job.

pub mod catalog;
pub mod db;
pub mod hash;
pub mod locks;
pub mod memory;

use std::fmt;
use chrono::{DateTime, Utc};
use shared::types::{ActivityRecord, ServiceIdentity, ServiceInfo, ServiceRecord, ServiceStatus};
use crate::error::RegistryResult;

pub use db::SqliteStore;
pub use memory::MemoryStore;

/// Addresses a record either by its numeric id or by its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKey {
    Id(i64),
    Identity(ServiceIdentity),
}

impl From<ServiceIdentity> for ServiceKey {
    fn from(identity: ServiceIdentity) -> Self {
        ServiceKey::Identity(identity)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKey::Id(id) => write!(f, "#{}", id),
            ServiceKey::Identity(identity) => identity.fmt(f),
        }
    }
}

pub trait RegistryStore: Send + Sync {
    /// Insert a new record with status DOWN and no timestamps.
    /// Fails with `InvalidVersionTag` or `DuplicateIdentity`.
    fn create(&self, info: &ServiceInfo) -> RegistryResult<ServiceRecord>;

    /// Overwrite app_url, health_check_url, description and version tag.
    /// Status and timestamps are left untouched.
    fn update(&self, key: &ServiceKey, info: &ServiceInfo) -> RegistryResult<ServiceRecord>;

    fn get(&self, key: &ServiceKey) -> RegistryResult<Option<ServiceRecord>>;

    fn get_all(&self) -> RegistryResult<Vec<ServiceRecord>>;

    fn resolve_address(&self, identity: &ServiceIdentity) -> RegistryResult<String>;

    /// Remove the record. Activity rows for its id are kept.
    fn delete(&self, key: &ServiceKey) -> RegistryResult<()>;

    /// UP stamps last_start_time, DOWN stamps last_stop_time.
    fn set_status(
        &self,
        key: &ServiceKey,
        status: ServiceStatus,
        at: DateTime<Utc>,
    ) -> RegistryResult<ServiceRecord>;

    /// Look up the live record for `identity` and upsert its activity row in
    /// one atomic step. Fails with `NotFound` when nothing is registered.
    fn record_activity(
        &self,
        identity: &ServiceIdentity,
        at: DateTime<Utc>,
    ) -> RegistryResult<ActivityRecord>;

    fn list_activity(&self) -> RegistryResult<Vec<ActivityRecord>>;
}
