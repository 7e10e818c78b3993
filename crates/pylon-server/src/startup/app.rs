//! Wires storage, registry and the publish pipeline from configuration

use std::sync::Arc;

use pylon_persistence::{
    ExternalDbPersistService, MemoryPersistService, PersistenceService, StorageMode,
};
use pylon_publish::{DirtyGatewayQueue, PluginBindingService, Publisher, RollingUpdateWorker};
use pylon_registry::{EtcdRegistryStore, MemoryRegistryStore, RegistryStore};
use tracing::{info, warn};

use crate::config::{Configuration, RegistryMode};

/// Long-lived services shared by the server and CLI commands
pub struct PylonApp {
    pub persistence: Arc<dyn PersistenceService>,
    pub publisher: Arc<Publisher>,
    pub queue: Arc<DirtyGatewayQueue>,
    pub bindings: PluginBindingService,
    sweep_interval_ms: u64,
}

impl PylonApp {
    pub async fn build(configuration: &Configuration) -> anyhow::Result<Self> {
        let persistence = create_persistence(configuration).await?;
        let store = create_registry_store(configuration)?;
        let publisher = Arc::new(Publisher::new(
            persistence.clone(),
            store,
            configuration.publisher_config(),
        ));
        let queue = Arc::new(DirtyGatewayQueue::new());
        let bindings = PluginBindingService::new(persistence.clone(), queue.clone());

        Ok(Self {
            persistence,
            publisher,
            queue,
            bindings,
            sweep_interval_ms: configuration.sweep_interval_ms(),
        })
    }

    pub fn rolling_update_worker(&self) -> RollingUpdateWorker {
        RollingUpdateWorker::new(
            self.queue.clone(),
            self.publisher.clone(),
            self.sweep_interval_ms,
        )
    }
}

async fn create_persistence(
    configuration: &Configuration,
) -> anyhow::Result<Arc<dyn PersistenceService>> {
    let mode = configuration.persistence_mode()?;
    info!("Persistence mode: {}", mode);

    let persistence: Arc<dyn PersistenceService> = match mode {
        StorageMode::ExternalDb => {
            let db = configuration.database_connection().await?;
            Arc::new(ExternalDbPersistService::new(db))
        }
        StorageMode::Memory => {
            warn!("In-memory persistence holds no gateways until seeded and is lost on exit");
            Arc::new(MemoryPersistService::new())
        }
    };
    persistence.health_check().await?;
    Ok(persistence)
}

fn create_registry_store(configuration: &Configuration) -> anyhow::Result<Arc<dyn RegistryStore>> {
    let mode = configuration.registry_mode()?;
    let store: Arc<dyn RegistryStore> = match mode {
        RegistryMode::Etcd => {
            let etcd = configuration.etcd_config();
            info!(endpoints = ?etcd.endpoints, "Registry mode: etcd");
            Arc::new(EtcdRegistryStore::new(etcd)?)
        }
        RegistryMode::Memory => {
            info!("Registry mode: memory");
            Arc::new(MemoryRegistryStore::new())
        }
    };
    Ok(store)
}
