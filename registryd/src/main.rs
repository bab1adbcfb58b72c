mod api;
mod config;
mod error;
mod registry;
mod store;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::{Config, StoreBackend};
use crate::registry::Registry;
use crate::store::catalog::VersionTagCatalog;
use crate::store::{MemoryStore, RegistryStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("registryd=info"))
        )
        .init();

    tracing::info!("Starting registryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/registryd/registryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let store = open_store(&config)?;
    let registry = Registry::new(store);

    let initial_services = registry.list().await?;
    tracing::info!("Registry holds {} services", initial_services.len());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Build API router
    let app = api::routes::router(api::routes::AppState { registry });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Open the configured backend and seed its version tag catalog
fn open_store(config: &Config) -> Result<Arc<dyn RegistryStore>> {
    let tags = &config.catalog.version_tags;
    if tags.is_empty() {
        tracing::warn!("No version tags configured, every registration will be rejected");
    }

    match config.store.backend {
        StoreBackend::Sqlite => {
            let store = SqliteStore::open(&config.store.db_path)?;
            tracing::info!("Opened database at {:?}", config.store.db_path);

            let inserted = store
                .seed_catalog(tags)
                .context("Failed to seed version tag catalog")?;
            let catalog = store.catalog()?;
            tracing::info!(inserted, total = catalog.len(), "Version tag catalog ready");
            for (id, name) in catalog.entries() {
                tracing::debug!(id, tag = %name, "Version tag");
            }

            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            let catalog = VersionTagCatalog::from_names(tags.iter().cloned());
            tracing::warn!(
                total = catalog.len(),
                "Using in-memory store, registrations will not survive a restart"
            );
            Ok(Arc::new(MemoryStore::new(catalog)))
        }
    }
}
