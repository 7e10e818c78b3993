//! Gateway+stage reconciliation
//!
//! [`Registry::sync_resources`] converges everything stored under one
//! gateway+stage prefix to exactly a desired resource set:
//!
//! 1. list the keys under the prefix into a "remaining" set
//! 2. upsert every desired resource, removing its key from "remaining"
//! 3. delete whatever is still in "remaining"
//!
//! Upserts are sequential and replace the whole value. A failed upsert is
//! recorded and the batch continues; a failed delete is logged and left for
//! the next reconciliation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::key::{RegistryKeyPrefix, ResourceKind};
use crate::store::RegistryStore;

/// Something the registry can store under a gateway+stage prefix
pub trait RegistryResource {
    fn kind(&self) -> ResourceKind;

    fn resource_id(&self) -> &str;

    /// Whole-resource JSON payload
    fn to_payload(&self) -> anyhow::Result<String>;
}

/// A resource read back from the registry
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    pub kind: ResourceKind,
    pub id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResource {
    pub key: String,
    pub error: String,
}

/// What a reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Keys written
    pub applied: Vec<String>,
    /// Stale keys removed
    pub deleted: Vec<String>,
    /// Desired resources that could not be written
    pub failed: Vec<FailedResource>,
    /// Stale keys that could not be removed
    pub delete_failures: Vec<FailedResource>,
}

impl SyncOutcome {
    /// Every desired resource was written
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Every desired resource was written and every stale key removed
    pub fn is_converged(&self) -> bool {
        self.failed.is_empty() && self.delete_failures.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.key.as_str()).collect()
    }
}

/// Registry view of one gateway+stage
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn RegistryStore>,
    prefix: RegistryKeyPrefix,
}

impl Registry {
    pub fn new(store: Arc<dyn RegistryStore>, prefix: RegistryKeyPrefix) -> Self {
        Self { store, prefix }
    }

    pub fn prefix(&self) -> &RegistryKeyPrefix {
        &self.prefix
    }

    /// Converge the prefix to exactly `desired`
    ///
    /// Fails only if the existing keys cannot be listed; per-key failures
    /// are reported in the outcome.
    pub async fn sync_resources<R: RegistryResource + Sync>(
        &self,
        desired: &[R],
    ) -> anyhow::Result<SyncOutcome> {
        let mut remaining: BTreeSet<String> = self
            .store
            .list_keys(&self.prefix.list_prefix())
            .await?
            .into_iter()
            .collect();
        let mut outcome = SyncOutcome::default();

        for resource in desired {
            let key = self
                .prefix
                .resource_key(resource.kind(), resource.resource_id());
            // A failed upsert leaves the existing value in place.
            remaining.remove(&key);

            let written = match resource.to_payload() {
                Ok(payload) => self.store.put(&key, &payload).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => {
                    debug!(key = %key, "Applied registry resource");
                    outcome.applied.push(key);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to apply registry resource");
                    outcome.failed.push(FailedResource {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }

        for key in remaining {
            match self.store.delete(&key).await {
                Ok(_) => {
                    debug!(key = %key, "Deleted stale registry resource");
                    outcome.deleted.push(key);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete stale registry resource");
                    outcome.delete_failures.push(FailedResource {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            prefix = %self.prefix,
            applied = outcome.applied.len(),
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            delete_failures = outcome.delete_failures.len(),
            "Registry reconciliation finished"
        );

        Ok(outcome)
    }

    /// Remove everything under the prefix
    pub async fn revoke(&self) -> anyhow::Result<SyncOutcome> {
        let nothing: [NoResource; 0] = [];
        self.sync_resources(&nothing).await
    }

    /// Read back every resource under the prefix. Keys that do not follow
    /// the layout, or hold invalid JSON, are skipped with a warning.
    pub async fn list_resources(&self) -> anyhow::Result<Vec<StoredResource>> {
        let pairs = self.store.list(&self.prefix.list_prefix()).await?;
        let mut resources = Vec::with_capacity(pairs.len());

        for (key, value) in pairs {
            let Some((kind, id)) = self.prefix.parse_resource_key(&key) else {
                warn!(key = %key, "Skipping registry key outside the resource layout");
                continue;
            };
            match serde_json::from_str(&value) {
                Ok(payload) => resources.push(StoredResource {
                    kind,
                    id: id.to_string(),
                    payload,
                }),
                Err(e) => warn!(key = %key, error = %e, "Skipping registry value that is not JSON"),
            }
        }

        Ok(resources)
    }
}

/// Uninhabited resource type for reconciling to the empty set
enum NoResource {}

impl RegistryResource for NoResource {
    fn kind(&self) -> ResourceKind {
        match *self {}
    }

    fn resource_id(&self) -> &str {
        match *self {}
    }

    fn to_payload(&self) -> anyhow::Result<String> {
        match *self {}
    }
}
