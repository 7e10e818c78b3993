//! In-memory persistence backend
//!
//! Keeps every table in process memory behind one lock. Used by standalone
//! runs and by tests; the seeding helpers stand in for the CRUD layer that
//! normally writes these rows.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use pylon_common::{
    BindingSource, PublishEventStatus, PublishSource, PublishStep, Scope, ScopeType, Status,
};

use crate::model::*;
use crate::traits::*;

#[derive(Default)]
struct Tables {
    next_id: i64,
    clock: i64,
    gateways: BTreeMap<i64, GatewayInfo>,
    stages: BTreeMap<i64, StageInfo>,
    backends: BTreeMap<i64, (i64, String)>,
    backend_configs: BTreeMap<(i64, i64), BackendConfig>,
    jwt_keys: HashMap<i64, JwtKeyInfo>,
    auth_configs: HashMap<i64, String>,
    ssl_certificates: BTreeMap<i64, SslCertificateInfo>,
    protos: BTreeMap<i64, ProtoInfo>,
    resource_versions: BTreeMap<i64, ResourceVersionInfo>,
    releases: BTreeMap<i64, ReleaseInfo>,
    histories: BTreeMap<i64, ReleaseHistoryInfo>,
    events: BTreeMap<i64, PublishEventInfo>,
    plugin_configs: BTreeMap<i64, (PluginConfigInfo, i64)>,
    plugin_bindings: BTreeMap<i64, StoredBinding>,
}

#[derive(Clone)]
struct StoredBinding {
    id: i64,
    gateway_id: i64,
    scope: Scope,
    config_id: i64,
    source: BindingSource,
    updated_time: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Monotonic millisecond clock so "most recently updated" is never a tie
    fn tick(&mut self) -> i64 {
        let now = pylon_common::utils::current_timestamp_millis();
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn joined_binding(&self, binding: &StoredBinding) -> Option<PluginBindingInfo> {
        let (config, config_updated) = self.plugin_configs.get(&binding.config_id)?;
        Some(PluginBindingInfo {
            id: binding.id,
            gateway_id: binding.gateway_id,
            scope: binding.scope,
            config_id: config.id,
            config_name: config.name.clone(),
            type_code: config.type_code.clone(),
            yaml: config.yaml.clone(),
            source: binding.source,
            updated_time: binding.updated_time.max(*config_updated),
        })
    }
}

/// In-memory persistence service
#[derive(Default)]
pub struct MemoryPersistService {
    tables: RwLock<Tables>,
    fail_binding_batches: AtomicBool,
    fail_history_stages: RwLock<HashSet<i64>>,
}

impl MemoryPersistService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent binding batch fail before touching any row
    pub fn set_fail_binding_batches(&self, fail: bool) {
        self.fail_binding_batches.store(fail, Ordering::SeqCst);
    }

    /// Make release history rows of a stage fail to be created
    pub fn set_fail_release_history(&self, stage_id: i64, fail: bool) {
        let mut stages = self.fail_history_stages.write();
        if fail {
            stages.insert(stage_id);
        } else {
            stages.remove(&stage_id);
        }
    }

    // ------------------------------------------------------------------
    // Seeding helpers
    // ------------------------------------------------------------------

    pub fn insert_gateway(&self, name: &str, status: Status) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        t.gateways.insert(
            id,
            GatewayInfo {
                id,
                name: name.to_string(),
                tenant_id: "default".to_string(),
                status,
            },
        );
        id
    }

    pub fn set_gateway_status(&self, gateway_id: i64, status: Status) {
        if let Some(gateway) = self.tables.write().gateways.get_mut(&gateway_id) {
            gateway.status = status;
        }
    }

    pub fn insert_stage(
        &self,
        gateway_id: i64,
        name: &str,
        status: Status,
        vars: BTreeMap<String, String>,
    ) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        t.stages.insert(
            id,
            StageInfo {
                id,
                gateway_id,
                name: name.to_string(),
                status,
                vars,
            },
        );
        id
    }

    pub fn set_stage_status(&self, stage_id: i64, status: Status) {
        if let Some(stage) = self.tables.write().stages.get_mut(&stage_id) {
            stage.status = status;
        }
    }

    pub fn delete_stage(&self, stage_id: i64) {
        let mut t = self.tables.write();
        t.stages.remove(&stage_id);
        t.releases.retain(|_, r| r.stage_id != stage_id);
    }

    pub fn insert_backend(&self, gateway_id: i64, name: &str) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        t.backends.insert(id, (gateway_id, name.to_string()));
        id
    }

    pub fn set_backend_config(&self, backend_id: i64, stage_id: i64, config: BackendConfig) {
        self.tables
            .write()
            .backend_configs
            .insert((stage_id, backend_id), config);
    }

    pub fn set_jwt_key(&self, gateway_id: i64, private_key: &str, public_key: &str) {
        self.tables.write().jwt_keys.insert(
            gateway_id,
            JwtKeyInfo {
                gateway_id,
                private_key: private_key.to_string(),
                public_key: public_key.to_string(),
            },
        );
    }

    pub fn set_gateway_auth_config(&self, gateway_id: i64, config: &str) {
        self.tables
            .write()
            .auth_configs
            .insert(gateway_id, config.to_string());
    }

    pub fn insert_ssl_certificate(
        &self,
        gateway_id: i64,
        stage_id: i64,
        name: &str,
        snis: Vec<String>,
        cert: &str,
        key: &str,
    ) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        t.ssl_certificates.insert(
            id,
            SslCertificateInfo {
                id,
                gateway_id,
                stage_id,
                name: name.to_string(),
                snis,
                cert: cert.to_string(),
                key: key.to_string(),
            },
        );
        id
    }

    pub fn insert_proto(&self, gateway_id: i64, name: &str, content: &str) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        t.protos.insert(
            id,
            ProtoInfo {
                id,
                gateway_id,
                name: name.to_string(),
                content: content.to_string(),
            },
        );
        id
    }

    pub fn insert_resource_version(
        &self,
        gateway_id: i64,
        version: &str,
        schema_version: &str,
        data: &serde_json::Value,
    ) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        t.resource_versions.insert(
            id,
            ResourceVersionInfo {
                id,
                gateway_id,
                version: version.to_string(),
                schema_version: schema_version.to_string(),
                data: data.to_string(),
            },
        );
        id
    }

    pub fn insert_plugin_config(
        &self,
        gateway_id: i64,
        name: &str,
        type_code: &str,
        yaml: &str,
    ) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        let updated = t.tick();
        t.plugin_configs.insert(
            id,
            (
                PluginConfigInfo {
                    id,
                    gateway_id,
                    name: name.to_string(),
                    type_code: type_code.to_string(),
                    yaml: yaml.to_string(),
                },
                updated,
            ),
        );
        id
    }

    pub fn update_plugin_config(&self, config_id: i64, yaml: &str) {
        let mut t = self.tables.write();
        let updated = t.tick();
        if let Some((config, time)) = t.plugin_configs.get_mut(&config_id) {
            config.yaml = yaml.to_string();
            *time = updated;
        }
    }

    pub fn insert_plugin_binding(
        &self,
        gateway_id: i64,
        scope: Scope,
        config_id: i64,
        source: BindingSource,
    ) -> i64 {
        let mut t = self.tables.write();
        let id = t.next_id();
        let updated_time = t.tick();
        t.plugin_bindings.insert(
            id,
            StoredBinding {
                id,
                gateway_id,
                scope,
                config_id,
                source,
                updated_time,
            },
        );
        id
    }

    pub fn plugin_binding_count(&self, gateway_id: i64) -> usize {
        self.tables
            .read()
            .plugin_bindings
            .values()
            .filter(|b| b.gateway_id == gateway_id)
            .count()
    }

    pub fn release_history_count(&self, gateway_id: i64) -> usize {
        self.tables
            .read()
            .histories
            .values()
            .filter(|h| h.gateway_id == gateway_id)
            .count()
    }

    pub fn publish_event_count(&self, gateway_id: i64) -> usize {
        self.tables
            .read()
            .events
            .values()
            .filter(|e| e.gateway_id == gateway_id)
            .count()
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl GatewayPersistence for MemoryPersistService {
    async fn gateway_find_by_id(&self, gateway_id: i64) -> anyhow::Result<Option<GatewayInfo>> {
        Ok(self.tables.read().gateways.get(&gateway_id).cloned())
    }

    async fn gateway_find_all(&self) -> anyhow::Result<Vec<GatewayInfo>> {
        Ok(self.tables.read().gateways.values().cloned().collect())
    }

    async fn stage_find_by_id(&self, stage_id: i64) -> anyhow::Result<Option<StageInfo>> {
        Ok(self.tables.read().stages.get(&stage_id).cloned())
    }

    async fn stage_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<StageInfo>> {
        Ok(self
            .tables
            .read()
            .stages
            .values()
            .filter(|s| s.gateway_id == gateway_id)
            .cloned()
            .collect())
    }

    async fn backend_config_find_by_stage(
        &self,
        stage_id: i64,
    ) -> anyhow::Result<Vec<BackendConfigInfo>> {
        let t = self.tables.read();
        Ok(t.backend_configs
            .range((stage_id, i64::MIN)..=(stage_id, i64::MAX))
            .map(|((_, backend_id), config)| BackendConfigInfo {
                backend_id: *backend_id,
                backend_name: t
                    .backends
                    .get(backend_id)
                    .map(|(_, name)| name.clone())
                    .unwrap_or_default(),
                stage_id,
                config: config.clone(),
            })
            .collect())
    }

    async fn jwt_key_find(&self, gateway_id: i64) -> anyhow::Result<Option<JwtKeyInfo>> {
        Ok(self.tables.read().jwt_keys.get(&gateway_id).cloned())
    }

    async fn gateway_auth_config_find(&self, gateway_id: i64) -> anyhow::Result<Option<String>> {
        Ok(self.tables.read().auth_configs.get(&gateway_id).cloned())
    }

    async fn ssl_certificate_find_by_stage(
        &self,
        stage_id: i64,
    ) -> anyhow::Result<Vec<SslCertificateInfo>> {
        Ok(self
            .tables
            .read()
            .ssl_certificates
            .values()
            .filter(|c| c.stage_id == stage_id)
            .cloned()
            .collect())
    }

    async fn proto_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<ProtoInfo>> {
        Ok(self
            .tables
            .read()
            .protos
            .values()
            .filter(|p| p.gateway_id == gateway_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReleasePersistence for MemoryPersistService {
    async fn release_find_by_stage(&self, stage_id: i64) -> anyhow::Result<Option<ReleaseInfo>> {
        Ok(self
            .tables
            .read()
            .releases
            .values()
            .find(|r| r.stage_id == stage_id)
            .cloned())
    }

    async fn release_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<ReleaseInfo>> {
        let mut releases: Vec<ReleaseInfo> = self
            .tables
            .read()
            .releases
            .values()
            .filter(|r| r.gateway_id == gateway_id)
            .cloned()
            .collect();
        releases.sort_by_key(|r| r.stage_id);
        Ok(releases)
    }

    async fn release_upsert(
        &self,
        gateway_id: i64,
        stage_id: i64,
        resource_version_id: i64,
        operator: &str,
    ) -> anyhow::Result<ReleaseInfo> {
        let mut t = self.tables.write();
        let updated_time = t.tick();

        if let Some(release) = t.releases.values_mut().find(|r| r.stage_id == stage_id) {
            release.resource_version_id = resource_version_id;
            release.updated_by = operator.to_string();
            release.updated_time = updated_time;
            return Ok(release.clone());
        }

        let id = t.next_id();
        let release = ReleaseInfo {
            id,
            gateway_id,
            stage_id,
            resource_version_id,
            updated_by: operator.to_string(),
            updated_time,
        };
        t.releases.insert(id, release.clone());
        Ok(release)
    }

    async fn resource_version_find_by_id(
        &self,
        resource_version_id: i64,
    ) -> anyhow::Result<Option<ResourceVersionInfo>> {
        Ok(self
            .tables
            .read()
            .resource_versions
            .get(&resource_version_id)
            .cloned())
    }

    async fn release_history_create(
        &self,
        gateway_id: i64,
        stage_id: i64,
        resource_version_id: i64,
        source: PublishSource,
        operator: &str,
    ) -> anyhow::Result<ReleaseHistoryInfo> {
        if self.fail_history_stages.read().contains(&stage_id) {
            anyhow::bail!("release history of stage {} rejected by storage", stage_id);
        }
        let mut t = self.tables.write();
        let id = t.next_id();
        let created_time = t.tick();
        let history = ReleaseHistoryInfo {
            id,
            gateway_id,
            stage_id,
            resource_version_id,
            source,
            created_by: operator.to_string(),
            created_time,
        };
        t.histories.insert(id, history.clone());
        Ok(history)
    }

    async fn release_history_find_latest(
        &self,
        gateway_id: i64,
        stage_id: i64,
    ) -> anyhow::Result<Option<ReleaseHistoryInfo>> {
        Ok(self
            .tables
            .read()
            .histories
            .values()
            .rev()
            .find(|h| h.gateway_id == gateway_id && h.stage_id == stage_id)
            .cloned())
    }

    async fn publish_event_create(
        &self,
        history: &ReleaseHistoryInfo,
        step: PublishStep,
        status: PublishEventStatus,
        detail: &str,
    ) -> anyhow::Result<PublishEventInfo> {
        let mut t = self.tables.write();
        let id = t.next_id();
        let created_time = t.tick();
        let event = PublishEventInfo {
            id,
            gateway_id: history.gateway_id,
            stage_id: history.stage_id,
            publish_id: history.id,
            step,
            status,
            detail: detail.to_string(),
            created_time,
        };
        t.events.insert(id, event.clone());
        Ok(event)
    }

    async fn publish_event_find_by_history(
        &self,
        publish_id: i64,
    ) -> anyhow::Result<Vec<PublishEventInfo>> {
        Ok(self
            .tables
            .read()
            .events
            .values()
            .filter(|e| e.publish_id == publish_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PluginPersistence for MemoryPersistService {
    async fn plugin_config_find_by_id(
        &self,
        config_id: i64,
    ) -> anyhow::Result<Option<PluginConfigInfo>> {
        Ok(self
            .tables
            .read()
            .plugin_configs
            .get(&config_id)
            .map(|(config, _)| config.clone()))
    }

    async fn plugin_binding_find_by_scope_type(
        &self,
        gateway_id: i64,
        scope_type: ScopeType,
    ) -> anyhow::Result<Vec<PluginBindingInfo>> {
        let t = self.tables.read();
        Ok(t.plugin_bindings
            .values()
            .filter(|b| b.gateway_id == gateway_id && b.scope.scope_type() == scope_type)
            .filter_map(|b| t.joined_binding(b))
            .collect())
    }

    async fn plugin_binding_apply_batch(&self, batch: &PluginBindingBatch) -> anyhow::Result<()> {
        if self.fail_binding_batches.load(Ordering::SeqCst) {
            anyhow::bail!("plugin binding batch rejected by storage");
        }
        if batch.is_empty() {
            return Ok(());
        }

        let mut t = self.tables.write();

        // Validate everything before the first mutation so a bad batch
        // leaves no trace.
        for update in &batch.updates {
            if !t.plugin_bindings.contains_key(&update.binding_id) {
                anyhow::bail!("plugin binding {} not exist", update.binding_id);
            }
            if !t.plugin_configs.contains_key(&update.config_id) {
                anyhow::bail!("plugin config {} not exist", update.config_id);
            }
        }
        for create in &batch.creates {
            if !t.plugin_configs.contains_key(&create.config_id) {
                anyhow::bail!("plugin config {} not exist", create.config_id);
            }
        }

        let now = t.tick();
        for id in &batch.deletes {
            t.plugin_bindings.remove(id);
        }
        for update in &batch.updates {
            if let Some(binding) = t.plugin_bindings.get_mut(&update.binding_id) {
                binding.config_id = update.config_id;
                binding.source = update.source;
                binding.updated_time = now;
            }
        }
        for create in &batch.creates {
            let id = t.next_id();
            t.plugin_bindings.insert(
                id,
                StoredBinding {
                    id,
                    gateway_id: create.gateway_id,
                    scope: create.scope,
                    config_id: create.config_id,
                    source: create.source,
                    updated_time: now,
                },
            );
        }

        Ok(())
    }
}
