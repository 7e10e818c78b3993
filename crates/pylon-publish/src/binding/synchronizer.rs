//! Batched plugin binding synchronization
//!
//! Diffs the plugins a resource version declares against the stored
//! bindings of a whole scope set, keyed by `(scope, plugin type)`, and
//! commits the resulting creates, updates and deletes as one atomic batch.
//!
//! Resource ids are shared by every stage of a gateway, so bindings of a
//! resource are only dropped once no released version of the gateway
//! contains it. Bindings of types a version does not declare belong to the
//! binding service and are never touched here.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use pylon_common::{BindingSource, Scope, ScopeType};
use pylon_persistence::{
    NewPluginBinding, PersistenceService, PluginBindingBatch, PluginBindingInfo,
    PluginBindingUpdate,
};
use tracing::{debug, info, warn};

use crate::model::ResourceData;
use crate::snapshot::ReleaseData;

/// One plugin a scope should be bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPlugin {
    pub scope: Scope,
    pub type_code: String,
    pub config_id: i64,
}

type BindingKey = (Scope, String);

pub struct PluginSynchronizer {
    persistence: Arc<dyn PersistenceService>,
}

impl PluginSynchronizer {
    pub fn new(persistence: Arc<dyn PersistenceService>) -> Self {
        Self { persistence }
    }

    /// Compute the batch that applies `desired` to the bindings of
    /// `scope_ids`.
    ///
    /// - a declared `(scope, type)` is bound to the declared config: the
    ///   newest direct binding is repointed, extra direct ones removed, and
    ///   a binding created when only legacy ones exist
    /// - undeclared bindings of a scope in the set are left alone
    /// - bindings of scopes outside both `scope_ids` and `retained_ids`
    ///   are removed
    pub fn diff(
        gateway_id: i64,
        scope_type: ScopeType,
        scope_ids: &[i64],
        retained_ids: &[i64],
        desired: &[DesiredPlugin],
        existing: &[PluginBindingInfo],
    ) -> PluginBindingBatch {
        let in_scope: HashSet<i64> = scope_ids.iter().copied().collect();
        let retained: HashSet<i64> = retained_ids.iter().copied().collect();

        // first declaration of a key wins
        let mut wanted: BTreeMap<BindingKey, i64> = BTreeMap::new();
        for plugin in desired
            .iter()
            .filter(|p| p.scope.scope_type() == scope_type && in_scope.contains(&p.scope.id()))
        {
            wanted
                .entry((plugin.scope, plugin.type_code.clone()))
                .or_insert(plugin.config_id);
        }

        let mut stored: BTreeMap<BindingKey, Vec<&PluginBindingInfo>> = BTreeMap::new();
        for binding in existing
            .iter()
            .filter(|b| b.gateway_id == gateway_id && b.scope.scope_type() == scope_type)
        {
            stored
                .entry((binding.scope, binding.type_code.clone()))
                .or_default()
                .push(binding);
        }

        let mut batch = PluginBindingBatch::default();

        for (key, bindings) in &stored {
            let scope_id = key.0.id();
            if !in_scope.contains(&scope_id) {
                if !retained.contains(&scope_id) {
                    batch.deletes.extend(bindings.iter().map(|b| b.id));
                }
                continue;
            }
            let Some(&config_id) = wanted.get(key) else {
                continue;
            };

            let mut direct: Vec<&PluginBindingInfo> = bindings
                .iter()
                .copied()
                .filter(|b| b.source == BindingSource::Direct)
                .collect();
            direct.sort_by_key(|b| std::cmp::Reverse((b.updated_time, b.id)));

            match direct.split_first() {
                Some((current, rest)) => {
                    if current.config_id != config_id {
                        batch.updates.push(PluginBindingUpdate {
                            binding_id: current.id,
                            config_id,
                            source: BindingSource::Direct,
                        });
                    }
                    batch.deletes.extend(rest.iter().map(|b| b.id));
                }
                None => batch.creates.push(NewPluginBinding {
                    gateway_id,
                    scope: key.0,
                    config_id,
                    source: BindingSource::Direct,
                }),
            }
        }

        for ((scope, _), config_id) in wanted.iter().filter(|(key, _)| !stored.contains_key(*key)) {
            batch.creates.push(NewPluginBinding {
                gateway_id,
                scope: *scope,
                config_id: *config_id,
                source: BindingSource::Direct,
            });
        }

        batch.creates.sort_by_key(|c| (c.scope, c.config_id));
        batch.deletes.sort_unstable();
        batch
    }

    /// Apply `desired` to the bindings of `scope_ids` and commit the
    /// changes atomically. Returns the applied batch.
    pub async fn sync(
        &self,
        gateway_id: i64,
        scope_type: ScopeType,
        scope_ids: &[i64],
        retained_ids: &[i64],
        desired: &[DesiredPlugin],
    ) -> anyhow::Result<PluginBindingBatch> {
        let existing = self
            .persistence
            .plugin_binding_find_by_scope_type(gateway_id, scope_type)
            .await?;
        let batch = Self::diff(
            gateway_id,
            scope_type,
            scope_ids,
            retained_ids,
            desired,
            &existing,
        );

        if batch.is_empty() {
            debug!(gateway_id, scope_type = %scope_type, "Plugin bindings already in sync");
            return Ok(batch);
        }

        self.persistence.plugin_binding_apply_batch(&batch).await?;
        info!(
            gateway_id,
            scope_type = %scope_type,
            creates = batch.creates.len(),
            updates = batch.updates.len(),
            deletes = batch.deletes.len(),
            "Plugin bindings synchronized"
        );
        Ok(batch)
    }

    /// Bind every resource of a release to the plugins its version
    /// declares, and unbind resources no released version contains.
    pub async fn sync_release(&self, data: &ReleaseData) -> anyhow::Result<PluginBindingBatch> {
        let release = data.release();
        let resources = data.resources();
        let scope_ids: Vec<i64> = resources.iter().map(|r| r.id).collect();
        let desired: Vec<DesiredPlugin> = resources
            .iter()
            .flat_map(|r| {
                r.plugins.iter().map(move |p| DesiredPlugin {
                    scope: Scope::Resource(r.id),
                    type_code: p.type_code.clone(),
                    config_id: p.config_id,
                })
            })
            .collect();
        let retained = self
            .resources_released_elsewhere(release.gateway_id, release.stage_id)
            .await?;

        self.sync(
            release.gateway_id,
            ScopeType::Resource,
            &scope_ids,
            &retained,
            &desired,
        )
        .await
    }

    /// Resource ids of the versions released to the other stages
    async fn resources_released_elsewhere(
        &self,
        gateway_id: i64,
        stage_id: i64,
    ) -> anyhow::Result<Vec<i64>> {
        let mut ids = Vec::new();
        for release in self.persistence.release_find_by_gateway(gateway_id).await? {
            if release.stage_id == stage_id {
                continue;
            }
            let Some(version) = self
                .persistence
                .resource_version_find_by_id(release.resource_version_id)
                .await?
            else {
                continue;
            };
            match serde_json::from_str::<Vec<ResourceData>>(&version.data) {
                Ok(resources) => ids.extend(resources.iter().map(|r| r.id)),
                Err(e) => warn!(
                    gateway_id,
                    stage_id = release.stage_id,
                    version = %version.version,
                    error = %e,
                    "Skipping malformed resource version"
                ),
            }
        }
        Ok(ids)
    }
}
