//! The registry service: every externally visible operation.
//!
//! Mutating operations take the per-identity lock before touching the store,
//! so work on one (name, version) is linearized while different identities run
//! in parallel. Store calls are blocking and run on tokio's blocking pool.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use shared::types::{ActivityRecord, ServiceIdentity, ServiceInfo, ServiceRecord, ServiceStatus};
use crate::error::{RegistryError, RegistryResult};
use crate::store::hash;
use crate::store::locks::IdentityLocks;
use crate::store::{RegistryStore, ServiceKey};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn RegistryStore>,
    locks: IdentityLocks,
    clock: Clock,
}

impl Registry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self::with_clock(store, Utc::now)
    }

    pub fn with_clock(
        store: Arc<dyn RegistryStore>,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            locks: IdentityLocks::new(),
            clock: Arc::new(clock),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> RegistryResult<T>
    where
        F: FnOnce(&dyn RegistryStore) -> RegistryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// Identity a key refers to. Ids are resolved against the store.
    async fn identity_for(&self, key: &ServiceKey) -> RegistryResult<ServiceIdentity> {
        match key {
            ServiceKey::Identity(identity) => Ok(identity.clone()),
            ServiceKey::Id(_) => Ok(self.get_by_key(key.clone()).await?.identity),
        }
    }

    async fn get_by_key(&self, key: ServiceKey) -> RegistryResult<ServiceRecord> {
        self.blocking(move |store| {
            store.get(&key)?.ok_or_else(|| RegistryError::not_found(&key))
        })
        .await
    }

    pub async fn register(&self, info: ServiceInfo) -> RegistryResult<ServiceRecord> {
        validate(&info)?;
        let identity = info.identity();

        let _guard = self.locks.lock(&identity).await;
        let record = self.blocking(move |store| store.create(&info)).await?;

        tracing::info!(service = %identity, id = record.id, tag = %record.version_tag, "Registered service");
        Ok(record)
    }

    pub async fn update(&self, key: ServiceKey, info: ServiceInfo) -> RegistryResult<ServiceRecord> {
        validate(&info)?;
        let identity = self.identity_for(&key).await?;

        let _guard = self.locks.lock(&identity).await;
        let record = self.blocking(move |store| store.update(&key, &info)).await?;

        tracing::info!(service = %identity, id = record.id, "Updated service");
        Ok(record)
    }

    pub async fn list(&self) -> RegistryResult<Vec<ServiceRecord>> {
        self.blocking(|store| store.get_all()).await
    }

    pub async fn get(&self, identity: &ServiceIdentity) -> RegistryResult<ServiceRecord> {
        self.get_by_key(ServiceKey::Identity(identity.clone())).await
    }

    pub async fn get_by_id(&self, id: i64) -> RegistryResult<ServiceRecord> {
        self.get_by_key(ServiceKey::Id(id)).await
    }

    pub async fn resolve_address(&self, identity: &ServiceIdentity) -> RegistryResult<String> {
        let identity = identity.clone();
        self.blocking(move |store| store.resolve_address(&identity)).await
    }

    pub async fn delete(&self, key: ServiceKey) -> RegistryResult<()> {
        let identity = self.identity_for(&key).await?;

        let _guard = self.locks.lock(&identity).await;
        self.blocking(move |store| store.delete(&key)).await?;

        tracing::info!(service = %identity, "Deleted service");
        Ok(())
    }

    pub async fn start(&self, identity: &ServiceIdentity) -> RegistryResult<ServiceRecord> {
        self.set_status(identity, ServiceStatus::Up).await
    }

    pub async fn stop(&self, identity: &ServiceIdentity) -> RegistryResult<ServiceRecord> {
        self.set_status(identity, ServiceStatus::Down).await
    }

    async fn set_status(
        &self,
        identity: &ServiceIdentity,
        status: ServiceStatus,
    ) -> RegistryResult<ServiceRecord> {
        let _guard = self.locks.lock(identity).await;
        let at = (self.clock)();
        let key = ServiceKey::Identity(identity.clone());
        let record = self
            .blocking(move |store| store.set_status(&key, status, at))
            .await?;

        tracing::info!(service = %identity, status = %status, "Service status changed");
        Ok(record)
    }

    /// Upsert the activity row of the service currently registered under
    /// `identity`.
    pub async fn record_activity(&self, identity: &ServiceIdentity) -> RegistryResult<ActivityRecord> {
        let _guard = self.locks.lock(identity).await;
        let at = (self.clock)();
        let target = identity.clone();

        let activity = self
            .blocking(move |store| store.record_activity(&target, at))
            .await?;

        tracing::debug!(service = %identity, id = activity.service_id, "Recorded activity");
        Ok(activity)
    }

    pub async fn list_activity(&self) -> RegistryResult<Vec<ActivityRecord>> {
        self.blocking(|store| store.list_activity()).await
    }

    /// Hex SHA-256 over the stable fields of every registered service
    pub async fn digest(&self) -> RegistryResult<String> {
        let services = self.list().await?;
        Ok(hash::compute_hash(&services))
    }
}

fn validate(info: &ServiceInfo) -> RegistryResult<()> {
    for (field, value) in [
        ("name", &info.name),
        ("version", &info.version),
        ("app_url", &info.app_url),
    ] {
        if value.trim().is_empty() {
            return Err(RegistryError::InvalidInput(format!("{} must not be empty", field)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use chrono::TimeZone;
    use crate::store::catalog::VersionTagCatalog;
    use crate::store::{MemoryStore, SqliteStore};

    fn memory_registry() -> Registry {
        let catalog = VersionTagCatalog::from_names(["stable", "beta"]);
        Registry::new(Arc::new(MemoryStore::new(catalog)))
    }

    fn sqlite_store() -> Arc<SqliteStore> {
        let store = SqliteStore::open(":memory:").unwrap();
        store.seed_catalog(["stable", "beta"]).unwrap();
        Arc::new(store)
    }

    fn sqlite_registry() -> Registry {
        Registry::new(sqlite_store())
    }

    /// Clock advancing one second per call
    fn ticking_registry() -> Registry {
        let ticks = Arc::new(AtomicI64::new(0));
        Registry::with_clock(sqlite_store(), move || {
            let n = ticks.fetch_add(1, Ordering::SeqCst);
            Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap()
        })
    }

    fn orders(app_url: &str) -> ServiceInfo {
        ServiceInfo {
            name: "orders".to_string(),
            version: "1.0".to_string(),
            app_url: app_url.to_string(),
            health_check_url: "http://orders.internal/health".to_string(),
            description: "order intake".to_string(),
            version_tag: "stable".to_string(),
        }
    }

    fn orders_id() -> ServiceIdentity {
        ServiceIdentity::new("orders", "1.0")
    }

    async fn example_scenario(registry: Registry) {
        let created = registry.register(orders("http://orders.internal")).await.unwrap();
        assert_eq!(created.status, ServiceStatus::Down);

        let started = registry.start(&orders_id()).await.unwrap();
        assert_eq!(started.status, ServiceStatus::Up);

        assert_eq!(
            registry.resolve_address(&orders_id()).await.unwrap(),
            "http://orders.internal"
        );

        assert!(matches!(
            registry.register(orders("http://other.internal")).await,
            Err(RegistryError::DuplicateIdentity(_))
        ));

        registry.delete(orders_id().into()).await.unwrap();
        assert!(matches!(
            registry.resolve_address(&orders_id()).await,
            Err(RegistryError::NotFound(_))
        ));

        let again = registry.register(orders("http://orders.internal")).await.unwrap();
        assert_eq!(again.status, ServiceStatus::Down);
        assert!(again.id > created.id);
    }

    #[tokio::test]
    async fn test_example_scenario_memory() {
        example_scenario(memory_registry()).await;
    }

    #[tokio::test]
    async fn test_example_scenario_sqlite() {
        example_scenario(sqlite_registry()).await;
    }

    #[tokio::test]
    async fn test_resolve_follows_latest_update() {
        let registry = sqlite_registry();
        let created = registry.register(orders("http://v1.internal")).await.unwrap();

        registry
            .update(orders_id().into(), orders("http://v2.internal"))
            .await
            .unwrap();
        assert_eq!(registry.resolve_address(&orders_id()).await.unwrap(), "http://v2.internal");

        registry
            .update(ServiceKey::Id(created.id), orders("http://v3.internal"))
            .await
            .unwrap();
        assert_eq!(registry.resolve_address(&orders_id()).await.unwrap(), "http://v3.internal");
    }

    #[tokio::test]
    async fn test_update_missing_service() {
        let registry = memory_registry();
        assert!(matches!(
            registry.update(ServiceKey::Id(42), orders("http://x")).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.update(orders_id().into(), orders("http://x")).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_tag_creates_nothing() {
        let registry = sqlite_registry();
        let mut info = orders("http://orders.internal");
        info.version_tag = "nightly".to_string();

        assert!(matches!(
            registry.register(info).await,
            Err(RegistryError::InvalidVersionTag(_))
        ));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_fields_rejected() {
        let registry = memory_registry();
        let mut info = orders("http://orders.internal");
        info.name = "  ".to_string();
        assert!(matches!(
            registry.register(info).await,
            Err(RegistryError::InvalidInput(_))
        ));

        assert!(matches!(
            registry.register(orders("")).await,
            Err(RegistryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_start_stop_timestamps() {
        let registry = ticking_registry();
        registry.register(orders("http://orders.internal")).await.unwrap();

        let started = registry.start(&orders_id()).await.unwrap();
        let t_start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(started.status, ServiceStatus::Up);
        assert_eq!(started.last_start_time, Some(t_start));
        assert_eq!(started.last_stop_time, None);

        let stopped = registry.stop(&orders_id()).await.unwrap();
        let t_stop = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
        assert_eq!(stopped.status, ServiceStatus::Down);
        assert_eq!(stopped.last_stop_time, Some(t_stop));
        assert_eq!(stopped.last_start_time, Some(t_start));

        // Starting again refreshes the start time only
        let restarted = registry.start(&orders_id()).await.unwrap();
        assert_eq!(restarted.last_start_time, Some(Utc.timestamp_opt(1_700_000_002, 0).unwrap()));
        assert_eq!(restarted.last_stop_time, Some(t_stop));

        let fetched = registry.get(&orders_id()).await.unwrap();
        assert_eq!(fetched, restarted);
    }

    #[tokio::test]
    async fn test_update_after_stop_keeps_timestamps() {
        let registry = ticking_registry();
        registry.register(orders("http://orders.internal")).await.unwrap();
        let started = registry.start(&orders_id()).await.unwrap();
        let stopped = registry.stop(&orders_id()).await.unwrap();

        let updated = registry
            .update(orders_id().into(), orders("http://moved.internal"))
            .await
            .unwrap();
        assert_eq!(updated.app_url, "http://moved.internal");
        assert_eq!(updated.status, ServiceStatus::Down);
        assert_eq!(updated.last_start_time, started.last_start_time);
        assert_eq!(updated.last_stop_time, stopped.last_stop_time);
        assert_eq!(updated.last_stop_time, Some(Utc.timestamp_opt(1_700_000_001, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_start_stop_missing_service() {
        let registry = memory_registry();
        assert!(matches!(registry.start(&orders_id()).await, Err(RegistryError::NotFound(_))));
        assert!(matches!(registry.stop(&orders_id()).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_record_activity_upserts() {
        let registry = ticking_registry();
        let created = registry.register(orders("http://orders.internal")).await.unwrap();

        registry.record_activity(&orders_id()).await.unwrap();
        let second = registry.record_activity(&orders_id()).await.unwrap();

        let rows = registry.list_activity().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service_id, created.id);
        assert_eq!(rows[0].last_activity_time, second.last_activity_time);
        assert_eq!(second.last_activity_time, Utc.timestamp_opt(1_700_000_001, 0).unwrap());
    }

    #[tokio::test]
    async fn test_record_activity_requires_live_service() {
        let registry = memory_registry();
        assert!(matches!(
            registry.record_activity(&orders_id()).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(registry.list_activity().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_does_not_touch_activity() {
        let registry = sqlite_registry();
        registry.register(orders("http://orders.internal")).await.unwrap();
        registry.resolve_address(&orders_id()).await.unwrap();
        assert!(registry.list_activity().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_activity_rows() {
        let registry = sqlite_registry();
        let created = registry.register(orders("http://orders.internal")).await.unwrap();
        registry.record_activity(&orders_id()).await.unwrap();

        registry.delete(ServiceKey::Id(created.id)).await.unwrap();
        let rows = registry.list_activity().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service_id, created.id);

        assert!(matches!(
            registry.delete(ServiceKey::Id(created.id)).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_digest_tracks_changes() {
        let registry = memory_registry();
        let empty = registry.digest().await.unwrap();

        registry.register(orders("http://orders.internal")).await.unwrap();
        let registered = registry.digest().await.unwrap();
        assert_ne!(empty, registered);

        registry.record_activity(&orders_id()).await.unwrap();
        assert_eq!(registry.digest().await.unwrap(), registered);

        registry.start(&orders_id()).await.unwrap();
        assert_ne!(registry.digest().await.unwrap(), registered);
    }

    async fn concurrent_register(registry: Registry) {
        let attempts = 32;
        let results = futures::future::join_all((0..attempts).map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .register(orders(&format!("http://orders-{}.internal", i)))
                    .await
            })
        }))
        .await;

        let mut successes = 0;
        let mut duplicates = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => successes += 1,
                Err(RegistryError::DuplicateIdentity(_)) => duplicates += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(duplicates, attempts - 1);
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_single_winner_memory() {
        concurrent_register(memory_registry()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_single_winner_sqlite() {
        concurrent_register(sqlite_registry()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_identities() {
        let registry = sqlite_registry();
        let results = futures::future::join_all((0..20).map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut info = orders("http://orders.internal");
                info.version = format!("{}.0", i);
                let record = registry.register(info).await.unwrap();
                registry.start(&record.identity).await.unwrap();
                registry.record_activity(&record.identity).await.unwrap();
            })
        }))
        .await;

        for result in results {
            result.unwrap();
        }

        let services = registry.list().await.unwrap();
        assert_eq!(services.len(), 20);
        assert!(services.iter().all(|s| s.status == ServiceStatus::Up));
        assert_eq!(registry.list_activity().await.unwrap().len(), 20);
    }
}
