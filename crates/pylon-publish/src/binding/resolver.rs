//! Plugin binding resolution for one plugin config
//!
//! Classifies a requested scope set against the existing bindings of the
//! config's plugin type: scopes without a binding are created, bound scopes
//! are refreshed in place (and overwritten when bound to another config of
//! the same type), and, when asked, scopes no longer requested are unbound.

use std::collections::{HashMap, HashSet};

use pylon_common::{BindingSource, Scope, ScopeType};
use pylon_persistence::{
    NewPluginBinding, PluginBindingBatch, PluginBindingInfo, PluginBindingUpdate, PluginConfigInfo,
};

/// An existing binding on one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeBinding {
    pub scope: Scope,
    pub binding_id: i64,
    pub previous_config_id: i64,
}

impl ScopeBinding {
    fn of(binding: &PluginBindingInfo) -> Self {
        Self {
            scope: binding.scope,
            binding_id: binding.id,
            previous_config_id: binding.config_id,
        }
    }
}

/// What binding one config to a scope set changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPlan {
    pub config_id: i64,
    pub type_code: String,
    /// Scopes without a binding of this type
    pub creates: Vec<Scope>,
    /// Bound scopes refreshed in place
    pub updates: Vec<ScopeBinding>,
    /// Updates that switch the scope away from another config
    pub overwrites: Vec<ScopeBinding>,
    /// Bindings of scopes no longer requested, ordered by scope id
    pub unbinds: Vec<ScopeBinding>,
    /// Extra bindings of this type on a requested scope
    pub duplicates: Vec<ScopeBinding>,
}

impl BindingPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.unbinds.is_empty()
            && self.duplicates.is_empty()
    }

    /// Storage changes that carry the plan out
    pub fn to_batch(&self, gateway_id: i64) -> PluginBindingBatch {
        PluginBindingBatch {
            creates: self
                .creates
                .iter()
                .map(|scope| NewPluginBinding {
                    gateway_id,
                    scope: *scope,
                    config_id: self.config_id,
                    source: BindingSource::Direct,
                })
                .collect(),
            updates: self
                .updates
                .iter()
                .map(|u| PluginBindingUpdate {
                    binding_id: u.binding_id,
                    config_id: self.config_id,
                    source: BindingSource::Direct,
                })
                .collect(),
            deletes: self
                .unbinds
                .iter()
                .chain(self.duplicates.iter())
                .map(|b| b.binding_id)
                .collect(),
        }
    }
}

/// Resolve binding `config` to `scope_ids`.
///
/// `existing` may hold bindings of any type and scope type; only those of
/// the config's plugin type under `scope_type` are considered. With `add`
/// unset requested scopes are left alone, with `delete` unset nothing is
/// unbound. Requested ids are deduplicated keeping request order.
pub fn resolve_bindings(
    config: &PluginConfigInfo,
    scope_type: ScopeType,
    scope_ids: &[i64],
    existing: &[PluginBindingInfo],
    add: bool,
    delete: bool,
) -> BindingPlan {
    let mut index: HashMap<i64, Vec<&PluginBindingInfo>> = HashMap::new();
    for binding in existing.iter().filter(|b| {
        b.scope.scope_type() == scope_type
            && b.type_code == config.type_code
            && b.gateway_id == config.gateway_id
    }) {
        index.entry(binding.scope.id()).or_default().push(binding);
    }

    let mut plan = BindingPlan {
        config_id: config.id,
        type_code: config.type_code.clone(),
        ..Default::default()
    };
    let mut seen = HashSet::with_capacity(scope_ids.len());

    for &scope_id in scope_ids {
        if !seen.insert(scope_id) {
            continue;
        }
        let bound = index.remove(&scope_id);
        if !add {
            continue;
        }
        let Some(bound) = bound.filter(|b| !b.is_empty()) else {
            plan.creates.push(Scope::new(scope_type, scope_id));
            continue;
        };
        // the binding the data plane currently sees is kept
        let rank = |b: &&PluginBindingInfo| (b.source, b.updated_time, b.id);
        let Some(current) = bound.iter().copied().max_by_key(rank) else {
            continue;
        };
        let update = ScopeBinding::of(current);
        if current.config_id != config.id {
            plan.overwrites.push(update.clone());
        }
        plan.updates.push(update);
        plan.duplicates.extend(
            bound
                .iter()
                .filter(|b| b.id != current.id)
                .map(|b| ScopeBinding::of(b)),
        );
    }

    if delete {
        let mut unbinds: Vec<ScopeBinding> = index
            .into_values()
            .flatten()
            .map(ScopeBinding::of)
            .collect();
        unbinds.sort_by_key(|b| (b.scope.id(), b.binding_id));
        plan.unbinds = unbinds;
    }

    plan
}
