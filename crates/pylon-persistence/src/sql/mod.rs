//! SQL-based persistence backend (MySQL/PostgreSQL via SeaORM)
//!
//! This module implements the `PersistenceService` trait with direct SeaORM
//! queries. Binding batches run inside a single database transaction.

use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use async_trait::async_trait;
use pylon_common::{
    BindingSource, PublishEventStatus, PublishSource, PublishStep, Scope, ScopeType, Status,
};
use sea_orm::{prelude::Expr, *};
use tracing::debug;

use crate::entity::{
    backend, backend_config, gateway, gateway_auth_config, jwt_key, plugin_binding,
    plugin_config, plugin_type, proto, publish_event, release, release_history,
    resource_version, ssl_certificate, stage,
};
use crate::model::*;
use crate::traits::*;

/// External database persistence service
///
/// Wraps a SeaORM `DatabaseConnection` and implements all persistence traits
/// by direct database queries.
pub struct ExternalDbPersistService {
    db: DatabaseConnection,
}

impl ExternalDbPersistService {
    /// Create a new ExternalDbPersistService with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn to_millis(time: chrono::NaiveDateTime) -> i64 {
    time.and_utc().timestamp_millis()
}

fn parse_vars(raw: &str) -> anyhow::Result<BTreeMap<String, String>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(raw).context("stage vars are not a JSON string map")
}

fn parse_enum<T: std::str::FromStr<Err = String>>(raw: &str) -> anyhow::Result<T> {
    raw.parse::<T>().map_err(|e| anyhow::anyhow!(e))
}

fn gateway_entity_to_info(model: gateway::Model) -> GatewayInfo {
    GatewayInfo {
        id: model.id,
        name: model.name,
        tenant_id: model.tenant_id,
        status: Status::from_code(model.status),
    }
}

fn stage_entity_to_info(model: stage::Model) -> anyhow::Result<StageInfo> {
    Ok(StageInfo {
        id: model.id,
        gateway_id: model.gateway_id,
        vars: parse_vars(&model.vars)?,
        name: model.name,
        status: Status::from_code(model.status),
    })
}

fn release_entity_to_info(model: release::Model) -> ReleaseInfo {
    ReleaseInfo {
        id: model.id,
        gateway_id: model.gateway_id,
        stage_id: model.stage_id,
        resource_version_id: model.resource_version_id,
        updated_by: model.updated_by.unwrap_or_default(),
        updated_time: to_millis(model.updated_time),
    }
}

fn history_entity_to_info(model: release_history::Model) -> anyhow::Result<ReleaseHistoryInfo> {
    Ok(ReleaseHistoryInfo {
        id: model.id,
        gateway_id: model.gateway_id,
        stage_id: model.stage_id,
        resource_version_id: model.resource_version_id,
        source: parse_enum::<PublishSource>(&model.source)?,
        created_by: model.created_by.unwrap_or_default(),
        created_time: to_millis(model.created_time),
    })
}

fn event_entity_to_info(model: publish_event::Model) -> anyhow::Result<PublishEventInfo> {
    Ok(PublishEventInfo {
        id: model.id,
        gateway_id: model.gateway_id,
        stage_id: model.stage_id,
        publish_id: model.publish_id,
        step: parse_enum::<PublishStep>(&model.name)?,
        status: parse_enum::<PublishEventStatus>(&model.status)?,
        detail: model.detail,
        created_time: to_millis(model.created_time),
    })
}

// ============================================================================
// PersistenceService implementation
// ============================================================================

#[async_trait]
impl PersistenceService for ExternalDbPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::ExternalDb
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        gateway::Entity::find()
            .select_only()
            .column_as(Expr::cust("1"), "health")
            .into_tuple::<i32>()
            .one(&self.db)
            .await?;
        Ok(())
    }
}

// ============================================================================
// GatewayPersistence implementation
// ============================================================================

#[async_trait]
impl GatewayPersistence for ExternalDbPersistService {
    async fn gateway_find_by_id(&self, gateway_id: i64) -> anyhow::Result<Option<GatewayInfo>> {
        Ok(gateway::Entity::find_by_id(gateway_id)
            .one(&self.db)
            .await?
            .map(gateway_entity_to_info))
    }

    async fn gateway_find_all(&self) -> anyhow::Result<Vec<GatewayInfo>> {
        Ok(gateway::Entity::find()
            .order_by_asc(gateway::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(gateway_entity_to_info)
            .collect())
    }

    async fn stage_find_by_id(&self, stage_id: i64) -> anyhow::Result<Option<StageInfo>> {
        stage::Entity::find_by_id(stage_id)
            .one(&self.db)
            .await?
            .map(stage_entity_to_info)
            .transpose()
    }

    async fn stage_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<StageInfo>> {
        stage::Entity::find()
            .filter(stage::Column::GatewayId.eq(gateway_id))
            .order_by_asc(stage::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(stage_entity_to_info)
            .collect()
    }

    async fn backend_config_find_by_stage(
        &self,
        stage_id: i64,
    ) -> anyhow::Result<Vec<BackendConfigInfo>> {
        let configs = backend_config::Entity::find()
            .filter(backend_config::Column::StageId.eq(stage_id))
            .order_by_asc(backend_config::Column::BackendId)
            .all(&self.db)
            .await?;
        if configs.is_empty() {
            return Ok(Vec::new());
        }

        let backend_ids: Vec<i64> = configs.iter().map(|c| c.backend_id).collect();
        let names: HashMap<i64, String> = backend::Entity::find()
            .filter(backend::Column::Id.is_in(backend_ids))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|b| (b.id, b.name))
            .collect();

        configs
            .into_iter()
            .map(|c| {
                let config: BackendConfig = serde_json::from_str(&c.config).with_context(|| {
                    format!("backend config of backend {} is not valid JSON", c.backend_id)
                })?;
                Ok(BackendConfigInfo {
                    backend_id: c.backend_id,
                    backend_name: names.get(&c.backend_id).cloned().unwrap_or_default(),
                    stage_id: c.stage_id,
                    config,
                })
            })
            .collect()
    }

    async fn jwt_key_find(&self, gateway_id: i64) -> anyhow::Result<Option<JwtKeyInfo>> {
        Ok(jwt_key::Entity::find()
            .filter(jwt_key::Column::GatewayId.eq(gateway_id))
            .one(&self.db)
            .await?
            .map(|m| JwtKeyInfo {
                gateway_id: m.gateway_id,
                private_key: m.private_key,
                public_key: m.public_key,
            }))
    }

    async fn gateway_auth_config_find(&self, gateway_id: i64) -> anyhow::Result<Option<String>> {
        Ok(gateway_auth_config::Entity::find()
            .filter(gateway_auth_config::Column::GatewayId.eq(gateway_id))
            .one(&self.db)
            .await?
            .map(|m| m.config))
    }

    async fn ssl_certificate_find_by_stage(
        &self,
        stage_id: i64,
    ) -> anyhow::Result<Vec<SslCertificateInfo>> {
        Ok(ssl_certificate::Entity::find()
            .filter(ssl_certificate::Column::StageId.eq(stage_id))
            .order_by_asc(ssl_certificate::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| SslCertificateInfo {
                id: m.id,
                gateway_id: m.gateway_id,
                stage_id: m.stage_id,
                name: m.name,
                snis: m
                    .snis
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                cert: m.cert,
                key: m.key,
            })
            .collect())
    }

    async fn proto_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<ProtoInfo>> {
        Ok(proto::Entity::find()
            .filter(proto::Column::GatewayId.eq(gateway_id))
            .order_by_asc(proto::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ProtoInfo {
                id: m.id,
                gateway_id: m.gateway_id,
                name: m.name,
                content: m.content,
            })
            .collect())
    }
}

// ============================================================================
// ReleasePersistence implementation
// ============================================================================

#[async_trait]
impl ReleasePersistence for ExternalDbPersistService {
    async fn release_find_by_stage(&self, stage_id: i64) -> anyhow::Result<Option<ReleaseInfo>> {
        Ok(release::Entity::find()
            .filter(release::Column::StageId.eq(stage_id))
            .one(&self.db)
            .await?
            .map(release_entity_to_info))
    }

    async fn release_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<ReleaseInfo>> {
        Ok(release::Entity::find()
            .filter(release::Column::GatewayId.eq(gateway_id))
            .order_by_asc(release::Column::StageId)
            .all(&self.db)
            .await?
            .into_iter()
            .map(release_entity_to_info)
            .collect())
    }

    async fn release_upsert(
        &self,
        gateway_id: i64,
        stage_id: i64,
        resource_version_id: i64,
        operator: &str,
    ) -> anyhow::Result<ReleaseInfo> {
        let existing = release::Entity::find()
            .filter(release::Column::StageId.eq(stage_id))
            .one(&self.db)
            .await?;

        let model = match existing {
            Some(entity) => {
                let mut active: release::ActiveModel = entity.into();
                active.resource_version_id = Set(resource_version_id);
                active.updated_by = Set(Some(operator.to_string()));
                active.updated_time = Set(now());
                active.update(&self.db).await?
            }
            None => {
                release::ActiveModel {
                    id: NotSet,
                    gateway_id: Set(gateway_id),
                    stage_id: Set(stage_id),
                    resource_version_id: Set(resource_version_id),
                    updated_by: Set(Some(operator.to_string())),
                    updated_time: Set(now()),
                }
                .insert(&self.db)
                .await?
            }
        };

        Ok(release_entity_to_info(model))
    }

    async fn resource_version_find_by_id(
        &self,
        resource_version_id: i64,
    ) -> anyhow::Result<Option<ResourceVersionInfo>> {
        Ok(resource_version::Entity::find_by_id(resource_version_id)
            .one(&self.db)
            .await?
            .map(|m| ResourceVersionInfo {
                id: m.id,
                gateway_id: m.gateway_id,
                version: m.version,
                schema_version: m.schema_version,
                data: m.data,
            }))
    }

    async fn release_history_create(
        &self,
        gateway_id: i64,
        stage_id: i64,
        resource_version_id: i64,
        source: PublishSource,
        operator: &str,
    ) -> anyhow::Result<ReleaseHistoryInfo> {
        let model = release_history::ActiveModel {
            id: NotSet,
            gateway_id: Set(gateway_id),
            stage_id: Set(stage_id),
            resource_version_id: Set(resource_version_id),
            source: Set(source.as_str().to_string()),
            created_by: Set(Some(operator.to_string())),
            created_time: Set(now()),
        }
        .insert(&self.db)
        .await?;

        history_entity_to_info(model)
    }

    async fn release_history_find_latest(
        &self,
        gateway_id: i64,
        stage_id: i64,
    ) -> anyhow::Result<Option<ReleaseHistoryInfo>> {
        release_history::Entity::find()
            .filter(release_history::Column::GatewayId.eq(gateway_id))
            .filter(release_history::Column::StageId.eq(stage_id))
            .order_by_desc(release_history::Column::Id)
            .one(&self.db)
            .await?
            .map(history_entity_to_info)
            .transpose()
    }

    async fn publish_event_create(
        &self,
        history: &ReleaseHistoryInfo,
        step: PublishStep,
        status: PublishEventStatus,
        detail: &str,
    ) -> anyhow::Result<PublishEventInfo> {
        let model = publish_event::ActiveModel {
            id: NotSet,
            gateway_id: Set(history.gateway_id),
            stage_id: Set(history.stage_id),
            publish_id: Set(history.id),
            name: Set(step.as_str().to_string()),
            status: Set(status.as_str().to_string()),
            detail: Set(detail.to_string()),
            created_time: Set(now()),
        }
        .insert(&self.db)
        .await?;

        event_entity_to_info(model)
    }

    async fn publish_event_find_by_history(
        &self,
        publish_id: i64,
    ) -> anyhow::Result<Vec<PublishEventInfo>> {
        publish_event::Entity::find()
            .filter(publish_event::Column::PublishId.eq(publish_id))
            .order_by_asc(publish_event::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(event_entity_to_info)
            .collect()
    }
}

// ============================================================================
// PluginPersistence implementation
// ============================================================================

#[async_trait]
impl PluginPersistence for ExternalDbPersistService {
    async fn plugin_config_find_by_id(
        &self,
        config_id: i64,
    ) -> anyhow::Result<Option<PluginConfigInfo>> {
        let Some(config) = plugin_config::Entity::find_by_id(config_id)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let type_code = plugin_type::Entity::find_by_id(config.type_id)
            .one(&self.db)
            .await?
            .map(|t| t.code)
            .ok_or_else(|| anyhow::anyhow!("plugin type {} not exist", config.type_id))?;

        Ok(Some(PluginConfigInfo {
            id: config.id,
            gateway_id: config.gateway_id,
            name: config.name,
            type_code,
            yaml: config.yaml,
        }))
    }

    async fn plugin_binding_find_by_scope_type(
        &self,
        gateway_id: i64,
        scope_type: ScopeType,
    ) -> anyhow::Result<Vec<PluginBindingInfo>> {
        let bindings = plugin_binding::Entity::find()
            .filter(plugin_binding::Column::GatewayId.eq(gateway_id))
            .filter(plugin_binding::Column::ScopeType.eq(scope_type.as_str()))
            .order_by_asc(plugin_binding::Column::Id)
            .all(&self.db)
            .await?;
        if bindings.is_empty() {
            return Ok(Vec::new());
        }

        let config_ids: Vec<i64> = bindings.iter().map(|b| b.config_id).collect();
        let configs: HashMap<i64, plugin_config::Model> = plugin_config::Entity::find()
            .filter(plugin_config::Column::Id.is_in(config_ids))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let type_ids: Vec<i64> = configs.values().map(|c| c.type_id).collect();
        let type_codes: HashMap<i64, String> = plugin_type::Entity::find()
            .filter(plugin_type::Column::Id.is_in(type_ids))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|t| (t.id, t.code))
            .collect();

        let mut result = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let Some(config) = configs.get(&binding.config_id) else {
                debug!(
                    binding_id = binding.id,
                    config_id = binding.config_id,
                    "Skipping plugin binding whose config no longer exists"
                );
                continue;
            };
            let type_code = type_codes
                .get(&config.type_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("plugin type {} not exist", config.type_id))?;

            result.push(PluginBindingInfo {
                id: binding.id,
                gateway_id: binding.gateway_id,
                scope: Scope::new(scope_type, binding.scope_id),
                config_id: config.id,
                config_name: config.name.clone(),
                type_code,
                yaml: config.yaml.clone(),
                source: parse_enum::<BindingSource>(&binding.source)?,
                // A binding is as fresh as the newer of itself and its config.
                updated_time: to_millis(binding.updated_time.max(config.updated_time)),
            });
        }

        Ok(result)
    }

    async fn plugin_binding_apply_batch(&self, batch: &PluginBindingBatch) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let now = now();
        let tx = self.db.begin().await?;

        if !batch.deletes.is_empty() {
            plugin_binding::Entity::delete_many()
                .filter(plugin_binding::Column::Id.is_in(batch.deletes.clone()))
                .exec(&tx)
                .await?;
        }

        for update in &batch.updates {
            let entity = plugin_binding::Entity::find_by_id(update.binding_id)
                .one(&tx)
                .await?
                .ok_or_else(|| anyhow::anyhow!("plugin binding {} not exist", update.binding_id))?;
            let mut active: plugin_binding::ActiveModel = entity.into();
            active.config_id = Set(update.config_id);
            active.source = Set(update.source.as_str().to_string());
            active.updated_time = Set(now);
            active.update(&tx).await?;
        }

        if !batch.creates.is_empty() {
            let models: Vec<plugin_binding::ActiveModel> = batch
                .creates
                .iter()
                .map(|c| plugin_binding::ActiveModel {
                    id: NotSet,
                    gateway_id: Set(c.gateway_id),
                    scope_type: Set(c.scope.scope_type().as_str().to_string()),
                    scope_id: Set(c.scope.id()),
                    config_id: Set(c.config_id),
                    source: Set(c.source.as_str().to_string()),
                    created_time: Set(now),
                    updated_time: Set(now),
                })
                .collect();
            plugin_binding::Entity::insert_many(models).exec(&tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
