//! Plugin binding service
//!
//! Applies a resolved [`BindingPlan`] in one storage transaction and marks
//! the gateway dirty so the next rolling update publishes the change.

use std::sync::Arc;

use pylon_common::{ChangeKind, PylonError, ScopeType};
use pylon_persistence::{PersistenceService, PluginBindingInfo, PluginConfigInfo};
use tracing::info;

use super::resolver::{BindingPlan, resolve_bindings};
use crate::queue::DirtyGatewayQueue;

pub struct PluginBindingService {
    persistence: Arc<dyn PersistenceService>,
    queue: Arc<DirtyGatewayQueue>,
}

impl PluginBindingService {
    pub fn new(persistence: Arc<dyn PersistenceService>, queue: Arc<DirtyGatewayQueue>) -> Self {
        Self { persistence, queue }
    }

    /// Bind a plugin config to `scope_ids`, overwriting bindings of the same
    /// plugin type, and with `delete` unbind the scopes not listed.
    pub async fn bind(
        &self,
        config_id: i64,
        scope_type: ScopeType,
        scope_ids: &[i64],
        add: bool,
        delete: bool,
    ) -> anyhow::Result<BindingPlan> {
        let config = self.find_config(config_id).await?;
        let existing = self
            .persistence
            .plugin_binding_find_by_type(config.gateway_id, scope_type, &config.type_code)
            .await?;

        let plan = resolve_bindings(&config, scope_type, scope_ids, &existing, add, delete);
        self.apply(&config, plan).await
    }

    /// Remove every binding of one plugin config under a scope type
    pub async fn unbind_config(
        &self,
        config_id: i64,
        scope_type: ScopeType,
    ) -> anyhow::Result<BindingPlan> {
        let config = self.find_config(config_id).await?;
        let existing: Vec<PluginBindingInfo> = self
            .persistence
            .plugin_binding_find_by_type(config.gateway_id, scope_type, &config.type_code)
            .await?
            .into_iter()
            .filter(|b| b.config_id == config.id)
            .collect();

        let plan = resolve_bindings(&config, scope_type, &[], &existing, false, true);
        self.apply(&config, plan).await
    }

    async fn find_config(&self, config_id: i64) -> anyhow::Result<PluginConfigInfo> {
        self.persistence
            .plugin_config_find_by_id(config_id)
            .await?
            .ok_or_else(|| PylonError::NotFound(format!("plugin config[id={}]", config_id)).into())
    }

    async fn apply(
        &self,
        config: &PluginConfigInfo,
        plan: BindingPlan,
    ) -> anyhow::Result<BindingPlan> {
        let batch = plan.to_batch(config.gateway_id);
        if batch.is_empty() {
            return Ok(plan);
        }

        self.persistence.plugin_binding_apply_batch(&batch).await?;
        self.queue
            .mark_dirty(ChangeKind::PluginBinding, config.gateway_id);

        info!(
            gateway_id = config.gateway_id,
            config_id = config.id,
            plugin_type = %config.type_code,
            creates = plan.creates.len(),
            updates = plan.updates.len(),
            overwrites = plan.overwrites.len(),
            unbinds = plan.unbinds.len(),
            "Plugin bindings applied"
        );
        Ok(plan)
    }
}
