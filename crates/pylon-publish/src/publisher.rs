//! Publish orchestration
//!
//! A publish of one gateway+stage runs three reported steps:
//!
//! 1. `VALIDATE_CONFIGURATION`: load the release snapshot and synchronize
//!    the resource plugin bindings the version declares
//! 2. `GENERATE_TASK`: convert the snapshot into data-plane resources
//! 3. `DISTRIBUTE_CONFIGURATION`: reconcile the registry prefix of the
//!    gateway+stage to exactly those resources
//!
//! The first failing step ends the attempt. Revoking sources run the same
//! steps against an empty resource set. Publishes of one gateway+stage are
//! serialized within the process, and so is the binding synchronization of
//! one gateway together with the binding snapshot it is read into.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use pylon_common::{
    DEFAULT_API_VERSION, DEFAULT_KEY_PREFIX, PublishSource, PublishStep, PylonError,
};
use pylon_persistence::{GatewayInfo, PersistenceService, ReleaseInfo, StageInfo};
use pylon_registry::{Registry, RegistryKeyPrefix, RegistryStore, SyncOutcome};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::binding::PluginSynchronizer;
use crate::event::PublishEventReporter;
use crate::snapshot::ReleaseData;
use crate::transformer::ResourceTransformer;

/// Operator recorded for publishes the control plane starts itself
pub const SYSTEM_OPERATOR: &str = "system";

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Namespace prefix of every registry key
    pub key_prefix: String,
    pub api_version: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    /// Not eligible; no attempt was recorded
    Skipped,
    Success,
    Failure,
}

/// Result of publishing one gateway+stage
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub gateway_id: i64,
    pub stage_id: i64,
    pub source: PublishSource,
    /// Release history id of the attempt, absent when skipped
    pub publish_id: Option<i64>,
    pub state: PublishState,
    /// Why the publish was skipped or failed
    pub reason: String,
    pub sync: Option<SyncOutcome>,
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        self.state == PublishState::Success
    }
}

/// Whether a stage may be published, and why not.
///
/// A stage needs a release and must be active under an active gateway.
pub fn check_eligibility(
    release: Option<&ReleaseInfo>,
    gateway: &GatewayInfo,
    stage: &StageInfo,
) -> (bool, String) {
    if release.is_none() {
        return (
            false,
            format!(
                "stage {} of gateway {} has no release",
                stage.name, gateway.name
            ),
        );
    }
    if !gateway.status.is_active() {
        return (false, format!("gateway {} is not active", gateway.name));
    }
    if !stage.status.is_active() {
        return (
            false,
            format!(
                "stage {} of gateway {} is not active",
                stage.name, gateway.name
            ),
        );
    }
    (true, String::new())
}

/// Attempt bookkeeping shared by every step
struct Attempt<'a> {
    source: PublishSource,
    gateway: &'a GatewayInfo,
    stage: &'a StageInfo,
    reporter: PublishEventReporter,
}

impl Attempt<'_> {
    fn outcome(&self, state: PublishState, reason: String, sync: Option<SyncOutcome>) -> PublishOutcome {
        PublishOutcome {
            gateway_id: self.gateway.id,
            stage_id: self.stage.id,
            source: self.source,
            publish_id: Some(self.reporter.history().id),
            state,
            reason,
            sync,
        }
    }

    async fn fail(&self, step: PublishStep, detail: String) -> PublishOutcome {
        error!(
            gateway = %self.gateway.name,
            stage = %self.stage.name,
            publish_id = self.reporter.history().id,
            step = %step,
            detail = %detail,
            "Publish step failed"
        );
        self.reporter.failure(step, &detail).await;
        self.outcome(PublishState::Failure, detail, None)
    }
}

pub struct Publisher {
    persistence: Arc<dyn PersistenceService>,
    store: Arc<dyn RegistryStore>,
    config: PublisherConfig,
    locks: DashMap<(i64, i64), Arc<Mutex<()>>>,
    binding_locks: DashMap<i64, Arc<Mutex<()>>>,
}

fn lock_for<K: Eq + Hash + Copy>(locks: &DashMap<K, Arc<Mutex<()>>>, key: K) -> Arc<Mutex<()>> {
    locks.entry(key).or_default().clone()
}

/// Drop a lock handle, removing the entry once nobody else holds it
fn release_lock<K: Eq + Hash>(locks: &DashMap<K, Arc<Mutex<()>>>, key: &K, lock: Arc<Mutex<()>>) {
    drop(lock);
    locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
}

impl Publisher {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        store: Arc<dyn RegistryStore>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            persistence,
            store,
            config,
            locks: DashMap::new(),
            binding_locks: DashMap::new(),
        }
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceService> {
        &self.persistence
    }

    /// Registry view of one gateway+stage
    pub fn registry(&self, gateway: &GatewayInfo, stage: &StageInfo) -> Result<Registry, PylonError> {
        let prefix = RegistryKeyPrefix::new(
            &self.config.key_prefix,
            &gateway.name,
            &stage.name,
            &self.config.api_version,
        )?;
        Ok(Registry::new(self.store.clone(), prefix))
    }

    /// Publish every stage of a gateway. A gateway-disable source revokes
    /// every stage instead.
    pub async fn trigger_publish(
        &self,
        source: PublishSource,
        operator: &str,
        gateway_id: i64,
    ) -> anyhow::Result<Vec<PublishOutcome>> {
        let gateway = self.find_gateway(gateway_id).await?;
        let stages = self.persistence.stage_find_by_gateway(gateway_id).await?;
        info!(
            gateway = %gateway.name,
            source = %source,
            operator,
            stages = stages.len(),
            "Publish triggered"
        );

        let mut outcomes = Vec::with_capacity(stages.len());
        for stage in &stages {
            let outcome = match self.publish_stage(source, operator, &gateway, stage).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        gateway = %gateway.name,
                        stage = %stage.name,
                        source = %source,
                        error = %e,
                        "Stage publish failed"
                    );
                    PublishOutcome {
                        gateway_id: gateway.id,
                        stage_id: stage.id,
                        source,
                        publish_id: None,
                        state: PublishState::Failure,
                        reason: format!("{:#}", e),
                        sync: None,
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Publish one stage. Stage disable and delete sources revoke it; a
    /// deleted stage must be revoked before its row is removed.
    pub async fn trigger_stage_publish(
        &self,
        source: PublishSource,
        operator: &str,
        stage_id: i64,
    ) -> anyhow::Result<PublishOutcome> {
        let stage = self
            .persistence
            .stage_find_by_id(stage_id)
            .await?
            .ok_or_else(|| PylonError::NotFound(format!("stage[id={}]", stage_id)))?;
        let gateway = self.find_gateway(stage.gateway_id).await?;
        self.publish_stage(source, operator, &gateway, &stage).await
    }

    /// Point a stage at a resource version and publish it
    pub async fn release(
        &self,
        operator: &str,
        stage_id: i64,
        resource_version_id: i64,
    ) -> anyhow::Result<PublishOutcome> {
        let stage = self
            .persistence
            .stage_find_by_id(stage_id)
            .await?
            .ok_or_else(|| PylonError::NotFound(format!("stage[id={}]", stage_id)))?;
        let version = self
            .persistence
            .resource_version_find_by_id(resource_version_id)
            .await?
            .ok_or_else(|| {
                PylonError::NotFound(format!("resource version[id={}]", resource_version_id))
            })?;
        if version.gateway_id != stage.gateway_id {
            return Err(PylonError::IllegalArgument(format!(
                "resource version {} does not belong to the gateway of stage {}",
                version.version, stage.name
            ))
            .into());
        }

        self.persistence
            .release_upsert(stage.gateway_id, stage.id, version.id, operator)
            .await?;
        self.trigger_stage_publish(PublishSource::VersionPublish, operator, stage.id)
            .await
    }

    async fn find_gateway(&self, gateway_id: i64) -> anyhow::Result<GatewayInfo> {
        self.persistence
            .gateway_find_by_id(gateway_id)
            .await?
            .ok_or_else(|| PylonError::NotFound(format!("gateway[id={}]", gateway_id)).into())
    }

    async fn publish_stage(
        &self,
        source: PublishSource,
        operator: &str,
        gateway: &GatewayInfo,
        stage: &StageInfo,
    ) -> anyhow::Result<PublishOutcome> {
        let key = (gateway.id, stage.id);
        let lock = lock_for(&self.locks, key);
        let outcome = {
            let _guard = lock.lock().await;
            self.publish_stage_locked(source, operator, gateway, stage)
                .await
        };
        release_lock(&self.locks, &key, lock);
        outcome
    }

    async fn publish_stage_locked(
        &self,
        source: PublishSource,
        operator: &str,
        gateway: &GatewayInfo,
        stage: &StageInfo,
    ) -> anyhow::Result<PublishOutcome> {
        if source.is_revoke() {
            return self.revoke_stage(source, operator, gateway, stage).await;
        }

        let release = self.persistence.release_find_by_stage(stage.id).await?;
        let (eligible, reason) = check_eligibility(release.as_ref(), gateway, stage);
        let release = match release {
            Some(release) if eligible => release,
            _ => {
                warn!(
                    gateway = %gateway.name,
                    stage = %stage.name,
                    source = %source,
                    reason = %reason,
                    "Publish skipped"
                );
                return Ok(PublishOutcome {
                    gateway_id: gateway.id,
                    stage_id: stage.id,
                    source,
                    publish_id: None,
                    state: PublishState::Skipped,
                    reason,
                    sync: None,
                });
            }
        };

        let history = self
            .persistence
            .release_history_create(
                gateway.id,
                stage.id,
                release.resource_version_id,
                source,
                operator,
            )
            .await?;
        let attempt = Attempt {
            source,
            gateway,
            stage,
            reporter: PublishEventReporter::new(
                self.persistence.clone(),
                history,
                source.emits_events(),
            ),
        };

        Ok(self.run_attempt(&attempt, release).await)
    }

    async fn run_attempt(&self, attempt: &Attempt<'_>, release: ReleaseInfo) -> PublishOutcome {
        let reporter = &attempt.reporter;

        let step = PublishStep::ValidateConfiguration;
        reporter.doing(step).await;
        let (data, registry) = match self.validate(attempt, release).await {
            Ok(validated) => validated,
            Err(e) => return attempt.fail(step, format!("{:#}", e)).await,
        };
        reporter
            .success(step, &format!("resource version {}", data.resource_version().version))
            .await;

        let step = PublishStep::GenerateTask;
        reporter.doing(step).await;
        let resources = match ResourceTransformer::new(&data).transform().await {
            Ok(resources) => resources,
            Err(e) => return attempt.fail(step, format!("{:#}", e)).await,
        };
        reporter
            .success(step, &format!("{} resources generated", resources.len()))
            .await;

        let step = PublishStep::DistributeConfiguration;
        reporter.doing(step).await;
        let sync = match registry.sync_resources(&resources).await {
            Ok(sync) => sync,
            Err(e) => return attempt.fail(step, format!("{:#}", e)).await,
        };
        self.finish_distribution(attempt, sync, false).await
    }

    async fn validate(
        &self,
        attempt: &Attempt<'_>,
        release: ReleaseInfo,
    ) -> anyhow::Result<(ReleaseData, Registry)> {
        let registry = self.registry(attempt.gateway, attempt.stage)?;
        let data = ReleaseData::load(self.persistence.clone(), release).await?;

        let gateway_id = attempt.gateway.id;
        let lock = lock_for(&self.binding_locks, gateway_id);
        let synced = {
            let _guard = lock.lock().await;
            self.sync_bindings(&data).await
        };
        release_lock(&self.binding_locks, &gateway_id, lock);
        synced?;

        Ok((data, registry))
    }

    /// Synchronize the bindings of a release and read them into its
    /// snapshot before another stage of the gateway can change them.
    async fn sync_bindings(&self, data: &ReleaseData) -> anyhow::Result<()> {
        PluginSynchronizer::new(self.persistence.clone())
            .sync_release(data)
            .await?;
        data.resource_plugins().await?;
        data.stage_plugins().await?;
        Ok(())
    }

    /// Record the distribution result. Resources that could not be written
    /// fail the attempt. Stale keys that could not be removed fail it only
    /// when revoking.
    async fn finish_distribution(
        &self,
        attempt: &Attempt<'_>,
        sync: SyncOutcome,
        revoking: bool,
    ) -> PublishOutcome {
        let step = PublishStep::DistributeConfiguration;

        let mut failed: Vec<&str> = sync.failed_keys();
        if revoking {
            failed.extend(sync.delete_failures.iter().map(|f| f.key.as_str()));
        }
        if !failed.is_empty() {
            let detail = format!("failed to distribute: {}", failed.join(", "));
            let mut outcome = attempt.fail(step, detail).await;
            outcome.sync = Some(sync);
            return outcome;
        }

        if !sync.delete_failures.is_empty() {
            warn!(
                gateway = %attempt.gateway.name,
                stage = %attempt.stage.name,
                keys = ?sync.delete_failures.iter().map(|f| f.key.as_str()).collect::<Vec<_>>(),
                "Stale registry keys left for the next reconciliation"
            );
        }

        let detail = format!(
            "{} applied, {} deleted",
            sync.applied.len(),
            sync.deleted.len()
        );
        attempt.reporter.success(step, &detail).await;
        info!(
            gateway = %attempt.gateway.name,
            stage = %attempt.stage.name,
            source = %attempt.source,
            publish_id = attempt.reporter.history().id,
            applied = sync.applied.len(),
            deleted = sync.deleted.len(),
            "Publish finished"
        );
        attempt.outcome(PublishState::Success, String::new(), Some(sync))
    }

    /// Remove everything published for a stage. Eligibility does not apply:
    /// the gateway or stage is usually being switched off.
    async fn revoke_stage(
        &self,
        source: PublishSource,
        operator: &str,
        gateway: &GatewayInfo,
        stage: &StageInfo,
    ) -> anyhow::Result<PublishOutcome> {
        let resource_version_id = self
            .persistence
            .release_find_by_stage(stage.id)
            .await?
            .map(|r| r.resource_version_id)
            .unwrap_or_default();
        let history = self
            .persistence
            .release_history_create(gateway.id, stage.id, resource_version_id, source, operator)
            .await?;
        let attempt = Attempt {
            source,
            gateway,
            stage,
            reporter: PublishEventReporter::new(
                self.persistence.clone(),
                history,
                source.emits_events(),
            ),
        };
        let reporter = &attempt.reporter;
        info!(gateway = %gateway.name, stage = %stage.name, source = %source, "Revoking stage");

        let step = PublishStep::ValidateConfiguration;
        reporter.doing(step).await;
        let registry = match self.registry(gateway, stage) {
            Ok(registry) => registry,
            Err(e) => return Ok(attempt.fail(step, e.to_string()).await),
        };
        reporter.success(step, "revoke").await;

        let step = PublishStep::GenerateTask;
        reporter.doing(step).await;
        reporter.success(step, "0 resources generated").await;

        let step = PublishStep::DistributeConfiguration;
        reporter.doing(step).await;
        let sync = match registry.revoke().await {
            Ok(sync) => sync,
            Err(e) => return Ok(attempt.fail(step, format!("{:#}", e)).await),
        };
        Ok(self.finish_distribution(&attempt, sync, true).await)
    }
}
