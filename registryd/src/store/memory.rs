//! In-memory registry store.
//!
//! Data is lost when the process exits. Used by tests and by deployments that
//! set `store.backend = "memory"`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use chrono::{DateTime, Utc};
use shared::types::{ActivityRecord, ServiceIdentity, ServiceInfo, ServiceRecord, ServiceStatus};
use crate::error::{RegistryError, RegistryResult};
use crate::store::catalog::VersionTagCatalog;
use crate::store::{RegistryStore, ServiceKey};

#[derive(Debug, Default)]
struct Tables {
    services: HashMap<ServiceIdentity, ServiceRecord>,
    ids: HashMap<i64, ServiceIdentity>,
    activity: HashMap<i64, DateTime<Utc>>,
    last_id: i64,
}

impl Tables {
    fn identity_for(&self, key: &ServiceKey) -> Option<ServiceIdentity> {
        match key {
            ServiceKey::Id(id) => self.ids.get(id).cloned(),
            ServiceKey::Identity(identity) => {
                self.services.contains_key(identity).then(|| identity.clone())
            }
        }
    }

    fn record_mut(&mut self, key: &ServiceKey) -> RegistryResult<&mut ServiceRecord> {
        let identity = self
            .identity_for(key)
            .ok_or_else(|| RegistryError::not_found(key))?;
        self.services
            .get_mut(&identity)
            .ok_or_else(|| RegistryError::not_found(key))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: VersionTagCatalog,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(catalog: VersionTagCatalog) -> Self {
        Self {
            catalog,
            tables: RwLock::default(),
        }
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| RegistryError::storage("lock poisoned"))
    }

    fn write(&self) -> RegistryResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| RegistryError::storage("lock poisoned"))
    }
}

impl RegistryStore for MemoryStore {
    fn create(&self, info: &ServiceInfo) -> RegistryResult<ServiceRecord> {
        self.catalog.resolve(&info.version_tag)?;

        let mut tables = self.write()?;
        let identity = info.identity();
        if tables.services.contains_key(&identity) {
            return Err(RegistryError::DuplicateIdentity(identity));
        }

        tables.last_id += 1;
        let record = ServiceRecord {
            id: tables.last_id,
            identity: identity.clone(),
            app_url: info.app_url.clone(),
            health_check_url: info.health_check_url.clone(),
            description: info.description.clone(),
            status: ServiceStatus::Down,
            version_tag: info.version_tag.clone(),
            last_start_time: None,
            last_stop_time: None,
        };

        tables.ids.insert(record.id, identity.clone());
        tables.services.insert(identity, record.clone());
        Ok(record)
    }

    fn update(&self, key: &ServiceKey, info: &ServiceInfo) -> RegistryResult<ServiceRecord> {
        let mut tables = self.write()?;
        let record = tables.record_mut(key)?;

        let given = info.identity();
        if record.identity != given {
            return Err(RegistryError::IdentityMismatch {
                existing: record.identity.clone(),
                given,
            });
        }
        self.catalog.resolve(&info.version_tag)?;

        record.app_url = info.app_url.clone();
        record.health_check_url = info.health_check_url.clone();
        record.description = info.description.clone();
        record.version_tag = info.version_tag.clone();
        Ok(record.clone())
    }

    fn get(&self, key: &ServiceKey) -> RegistryResult<Option<ServiceRecord>> {
        let tables = self.read()?;
        Ok(tables
            .identity_for(key)
            .and_then(|identity| tables.services.get(&identity).cloned()))
    }

    fn get_all(&self) -> RegistryResult<Vec<ServiceRecord>> {
        Ok(self.read()?.services.values().cloned().collect())
    }

    fn resolve_address(&self, identity: &ServiceIdentity) -> RegistryResult<String> {
        self.read()?
            .services
            .get(identity)
            .map(|record| record.app_url.clone())
            .ok_or_else(|| RegistryError::not_found(identity))
    }

    fn delete(&self, key: &ServiceKey) -> RegistryResult<()> {
        let mut tables = self.write()?;
        let identity = tables
            .identity_for(key)
            .ok_or_else(|| RegistryError::not_found(key))?;

        if let Some(record) = tables.services.remove(&identity) {
            tables.ids.remove(&record.id);
        }
        Ok(())
    }

    fn set_status(
        &self,
        key: &ServiceKey,
        status: ServiceStatus,
        at: DateTime<Utc>,
    ) -> RegistryResult<ServiceRecord> {
        let mut tables = self.write()?;
        let record = tables.record_mut(key)?;

        record.status = status;
        match status {
            ServiceStatus::Up => record.last_start_time = Some(at),
            ServiceStatus::Down => record.last_stop_time = Some(at),
        }
        Ok(record.clone())
    }

    fn record_activity(
        &self,
        identity: &ServiceIdentity,
        at: DateTime<Utc>,
    ) -> RegistryResult<ActivityRecord> {
        let mut tables = self.write()?;
        let service_id = tables
            .services
            .get(identity)
            .map(|record| record.id)
            .ok_or_else(|| RegistryError::not_found(identity))?;
        tables.activity.insert(service_id, at);

        Ok(ActivityRecord {
            service_id,
            last_activity_time: at,
        })
    }

    fn list_activity(&self) -> RegistryResult<Vec<ActivityRecord>> {
        Ok(self
            .read()?
            .activity
            .iter()
            .map(|(service_id, at)| ActivityRecord {
                service_id: *service_id,
                last_activity_time: *at,
            })
            .collect())
    }
}
