//! Release data snapshot
//!
//! `ReleaseData` is the read-model one publish works from. Each part is
//! loaded on first use and memoized for the lifetime of the snapshot, so
//! every convertor in a publish sees the same state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use pylon_common::{CURRENT_SCHEMA_VERSION, PylonError, Scope, ScopeType};
use pylon_persistence::{
    BackendConfigInfo, GatewayInfo, JwtKeyInfo, PersistenceService, PluginBindingInfo, ProtoInfo,
    ReleaseInfo, ResourceVersionInfo, SslCertificateInfo, StageInfo,
};
use tokio::sync::OnceCell;

use crate::model::ResourceData;

/// Whether a resource version schema can go through conversion. Only the
/// major version is compared.
pub fn is_supported_schema(schema_version: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    major(schema_version).is_some_and(|m| Some(m) == major(CURRENT_SCHEMA_VERSION))
}

/// Collapse bindings to one per plugin type, ordered by type code.
///
/// A direct binding beats a legacy one of the same type; among bindings of
/// the same source the most recently updated wins, then the highest id.
pub fn dedup_plugin_bindings(bindings: Vec<PluginBindingInfo>) -> Vec<PluginBindingInfo> {
    let mut by_type: BTreeMap<String, PluginBindingInfo> = BTreeMap::new();

    for binding in bindings {
        let rank = |b: &PluginBindingInfo| (b.source, b.updated_time, b.id);
        match by_type.get(&binding.type_code) {
            Some(current) if rank(current) >= rank(&binding) => {}
            _ => {
                by_type.insert(binding.type_code.clone(), binding);
            }
        }
    }

    by_type.into_values().collect()
}

pub struct ReleaseData {
    persistence: Arc<dyn PersistenceService>,
    release: ReleaseInfo,
    resource_version: ResourceVersionInfo,
    resources: Vec<ResourceData>,
    gateway: OnceCell<GatewayInfo>,
    stage: OnceCell<StageInfo>,
    jwt_key: OnceCell<Option<JwtKeyInfo>>,
    auth_config: OnceCell<Option<serde_json::Value>>,
    stage_plugins: OnceCell<Vec<PluginBindingInfo>>,
    backend_configs: OnceCell<Vec<BackendConfigInfo>>,
    resource_plugins: OnceCell<HashMap<i64, Vec<PluginBindingInfo>>>,
    ssl_certificates: OnceCell<Vec<SslCertificateInfo>>,
    protos: OnceCell<Vec<ProtoInfo>>,
}

impl ReleaseData {
    /// Build the snapshot of a release.
    ///
    /// Fails when the resource version is missing or does not use the
    /// current schema; those versions must be migrated before release.
    pub async fn load(
        persistence: Arc<dyn PersistenceService>,
        release: ReleaseInfo,
    ) -> anyhow::Result<Self> {
        let resource_version = persistence
            .resource_version_find_by_id(release.resource_version_id)
            .await?
            .ok_or_else(|| {
                PylonError::NotFound(format!(
                    "resource version[id={}]",
                    release.resource_version_id
                ))
            })?;

        if !is_supported_schema(&resource_version.schema_version) {
            return Err(PylonError::UnsupportedSchema(resource_version.schema_version).into());
        }

        let resources: Vec<ResourceData> =
            serde_json::from_str(&resource_version.data).map_err(|e| {
                PylonError::IllegalArgument(format!(
                    "resource version {} holds malformed resources: {}",
                    resource_version.version, e
                ))
            })?;

        Ok(Self {
            persistence,
            release,
            resource_version,
            resources,
            gateway: OnceCell::new(),
            stage: OnceCell::new(),
            jwt_key: OnceCell::new(),
            auth_config: OnceCell::new(),
            stage_plugins: OnceCell::new(),
            backend_configs: OnceCell::new(),
            resource_plugins: OnceCell::new(),
            ssl_certificates: OnceCell::new(),
            protos: OnceCell::new(),
        })
    }

    pub fn release(&self) -> &ReleaseInfo {
        &self.release
    }

    pub fn resource_version(&self) -> &ResourceVersionInfo {
        &self.resource_version
    }

    pub fn resources(&self) -> &[ResourceData] {
        &self.resources
    }

    pub async fn gateway(&self) -> anyhow::Result<&GatewayInfo> {
        self.gateway
            .get_or_try_init(|| async {
                let gateway = self
                    .persistence
                    .gateway_find_by_id(self.release.gateway_id)
                    .await?;
                gateway.ok_or_else(|| {
                    anyhow::Error::from(PylonError::NotFound(format!(
                        "gateway[id={}]",
                        self.release.gateway_id
                    )))
                })
            })
            .await
    }

    pub async fn stage(&self) -> anyhow::Result<&StageInfo> {
        self.stage
            .get_or_try_init(|| async {
                let stage = self
                    .persistence
                    .stage_find_by_id(self.release.stage_id)
                    .await?;
                stage.ok_or_else(|| {
                    anyhow::Error::from(PylonError::NotFound(format!(
                        "stage[id={}]",
                        self.release.stage_id
                    )))
                })
            })
            .await
    }

    pub async fn jwt_key(&self) -> anyhow::Result<Option<&JwtKeyInfo>> {
        let key = self
            .jwt_key
            .get_or_try_init(|| self.persistence.jwt_key_find(self.release.gateway_id))
            .await?;
        Ok(key.as_ref())
    }

    /// Gateway auth config parsed as JSON
    pub async fn gateway_auth_config(&self) -> anyhow::Result<Option<&serde_json::Value>> {
        let config = self
            .auth_config
            .get_or_try_init(|| async {
                let raw = self
                    .persistence
                    .gateway_auth_config_find(self.release.gateway_id)
                    .await?;
                raw.map(|r| serde_json::from_str::<serde_json::Value>(&r))
                    .transpose()
                    .map_err(|e| {
                        anyhow::Error::from(PylonError::IllegalArgument(format!(
                            "gateway auth config is not JSON: {}",
                            e
                        )))
                    })
            })
            .await?;
        Ok(config.as_ref())
    }

    /// Stage plugins, one per type
    pub async fn stage_plugins(&self) -> anyhow::Result<&[PluginBindingInfo]> {
        let plugins = self
            .stage_plugins
            .get_or_try_init(|| async {
                let bindings = self
                    .persistence
                    .plugin_binding_find_by_scope_type(self.release.gateway_id, ScopeType::Stage)
                    .await?;
                let stage_scope = Scope::Stage(self.release.stage_id);
                anyhow::Ok(dedup_plugin_bindings(
                    bindings
                        .into_iter()
                        .filter(|b| b.scope == stage_scope)
                        .collect(),
                ))
            })
            .await?;
        Ok(plugins)
    }

    pub async fn backend_configs(&self) -> anyhow::Result<&[BackendConfigInfo]> {
        let configs = self
            .backend_configs
            .get_or_try_init(|| {
                self.persistence
                    .backend_config_find_by_stage(self.release.stage_id)
            })
            .await?;
        Ok(configs)
    }

    /// Plugins of every resource in the version, one per type per resource
    pub async fn resource_plugins(&self) -> anyhow::Result<&HashMap<i64, Vec<PluginBindingInfo>>> {
        self.resource_plugins
            .get_or_try_init(|| async {
                let bindings = self
                    .persistence
                    .plugin_binding_find_by_scope_type(
                        self.release.gateway_id,
                        ScopeType::Resource,
                    )
                    .await?;

                let mut grouped: HashMap<i64, Vec<PluginBindingInfo>> = self
                    .resources
                    .iter()
                    .map(|r| (r.id, Vec::new()))
                    .collect();
                for binding in bindings {
                    if let Some(list) = grouped.get_mut(&binding.scope.id()) {
                        list.push(binding);
                    }
                }

                anyhow::Ok(
                    grouped
                        .into_iter()
                        .map(|(id, list)| (id, dedup_plugin_bindings(list)))
                        .collect(),
                )
            })
            .await
    }

    pub async fn ssl_certificates(&self) -> anyhow::Result<&[SslCertificateInfo]> {
        let certs = self
            .ssl_certificates
            .get_or_try_init(|| {
                self.persistence
                    .ssl_certificate_find_by_stage(self.release.stage_id)
            })
            .await?;
        Ok(certs)
    }

    pub async fn protos(&self) -> anyhow::Result<&[ProtoInfo]> {
        let protos = self
            .protos
            .get_or_try_init(|| self.persistence.proto_find_by_gateway(self.release.gateway_id))
            .await?;
        Ok(protos)
    }
}
