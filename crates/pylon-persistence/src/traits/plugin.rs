//! Plugin persistence trait

use async_trait::async_trait;
use pylon_common::ScopeType;

use crate::model::{PluginBindingBatch, PluginBindingInfo, PluginConfigInfo};

#[async_trait]
pub trait PluginPersistence: Send + Sync {
    async fn plugin_config_find_by_id(
        &self,
        config_id: i64,
    ) -> anyhow::Result<Option<PluginConfigInfo>>;

    /// Bindings of one scope type, joined with config and type, ordered by id
    async fn plugin_binding_find_by_scope_type(
        &self,
        gateway_id: i64,
        scope_type: ScopeType,
    ) -> anyhow::Result<Vec<PluginBindingInfo>>;

    /// Bindings of one scope type restricted to a plugin type code
    async fn plugin_binding_find_by_type(
        &self,
        gateway_id: i64,
        scope_type: ScopeType,
        type_code: &str,
    ) -> anyhow::Result<Vec<PluginBindingInfo>> {
        let bindings = self
            .plugin_binding_find_by_scope_type(gateway_id, scope_type)
            .await?;
        Ok(bindings
            .into_iter()
            .filter(|b| b.type_code == type_code)
            .collect())
    }

    /// Apply creates, updates and deletes atomically. Either every change
    /// is visible afterwards or none is.
    async fn plugin_binding_apply_batch(&self, batch: &PluginBindingBatch) -> anyhow::Result<()>;
}
