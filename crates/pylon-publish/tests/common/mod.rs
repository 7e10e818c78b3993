// Shared fixture for pipeline tests: one gateway with one stage and one
// backend, wired to in-memory persistence and registry backends.

#![allow(dead_code)]

use std::sync::Arc;

use pylon_common::Status;
use pylon_persistence::{BackendConfig, BackendHost, MemoryPersistService, ReleasePersistence};
use pylon_publish::{Publisher, PublisherConfig};
use pylon_registry::{MemoryRegistryStore, Registry, RegistryKeyPrefix};

pub const GATEWAY: &str = "demo";
pub const STAGE: &str = "prod";

pub struct Fixture {
    pub store: Arc<MemoryPersistService>,
    pub registry_store: MemoryRegistryStore,
    pub publisher: Arc<Publisher>,
    pub gateway_id: i64,
    pub stage_id: i64,
    pub backend_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryPersistService::new());
        let gateway_id = store.insert_gateway(GATEWAY, Status::Active);
        let stage_id = store.insert_stage(gateway_id, STAGE, Status::Active, Default::default());
        let backend_id = store.insert_backend(gateway_id, "default");
        store.set_backend_config(
            backend_id,
            stage_id,
            BackendConfig {
                hosts: vec![BackendHost {
                    scheme: "http".to_string(),
                    host: "10.0.0.1:8080".to_string(),
                    weight: 100,
                }],
                ..Default::default()
            },
        );

        let registry_store = MemoryRegistryStore::new();
        let publisher = Arc::new(Publisher::new(
            store.clone(),
            Arc::new(registry_store.clone()),
            PublisherConfig::default(),
        ));

        Self {
            store,
            registry_store,
            publisher,
            gateway_id,
            stage_id,
            backend_id,
        }
    }

    /// A resource proxied to the fixture backend
    pub fn resource(&self, id: i64, path: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("resource-{}", id),
            "method": "GET",
            "path": path,
            "proxy": {"backend_id": self.backend_id, "method": "GET", "path": path}
        })
    }

    /// Store a resource version and point the stage at it
    pub async fn release(&self, version: &str, resources: Vec<serde_json::Value>) -> i64 {
        let version_id = self.store.insert_resource_version(
            self.gateway_id,
            version,
            "2.0",
            &serde_json::Value::Array(resources),
        );
        self.store
            .release_upsert(self.gateway_id, self.stage_id, version_id, "admin")
            .await
            .unwrap();
        version_id
    }

    pub fn registry(&self) -> Registry {
        let prefix = RegistryKeyPrefix::new("/pylon", GATEWAY, STAGE, "v2").unwrap();
        Registry::new(Arc::new(self.registry_store.clone()), prefix)
    }

    pub fn route_key(&self, resource_id: i64) -> String {
        format!("/pylon/{}/{}/v2/routes/{}.{}.{}", GATEWAY, STAGE, GATEWAY, STAGE, resource_id)
    }

    pub fn service_key(&self) -> String {
        format!(
            "/pylon/{}/{}/v2/services/stage-{}-backend-{}",
            GATEWAY, STAGE, self.stage_id, self.backend_id
        )
    }

    /// Keys under the fixture stage, sorted
    pub async fn keys(&self) -> Vec<String> {
        use pylon_registry::RegistryStore;
        self.registry_store
            .list_keys(&format!("/pylon/{}/{}/v2/", GATEWAY, STAGE))
            .await
            .unwrap()
    }
}
