//! Release persistence trait
//!
//! Releases, resource versions and the append-only publish history.

use async_trait::async_trait;
use pylon_common::{PublishEventStatus, PublishSource, PublishStep};

use crate::model::{PublishEventInfo, ReleaseHistoryInfo, ReleaseInfo, ResourceVersionInfo};

#[async_trait]
pub trait ReleasePersistence: Send + Sync {
    async fn release_find_by_stage(&self, stage_id: i64) -> anyhow::Result<Option<ReleaseInfo>>;

    /// Releases of a gateway ordered by stage id
    async fn release_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<ReleaseInfo>>;

    /// Point a stage at a resource version, creating the release if needed
    async fn release_upsert(
        &self,
        gateway_id: i64,
        stage_id: i64,
        resource_version_id: i64,
        operator: &str,
    ) -> anyhow::Result<ReleaseInfo>;

    async fn resource_version_find_by_id(
        &self,
        resource_version_id: i64,
    ) -> anyhow::Result<Option<ResourceVersionInfo>>;

    async fn release_history_create(
        &self,
        gateway_id: i64,
        stage_id: i64,
        resource_version_id: i64,
        source: PublishSource,
        operator: &str,
    ) -> anyhow::Result<ReleaseHistoryInfo>;

    /// Most recent attempt for a stage
    async fn release_history_find_latest(
        &self,
        gateway_id: i64,
        stage_id: i64,
    ) -> anyhow::Result<Option<ReleaseHistoryInfo>>;

    async fn publish_event_create(
        &self,
        history: &ReleaseHistoryInfo,
        step: PublishStep,
        status: PublishEventStatus,
        detail: &str,
    ) -> anyhow::Result<PublishEventInfo>;

    /// Events of one attempt in insertion order
    async fn publish_event_find_by_history(
        &self,
        publish_id: i64,
    ) -> anyhow::Result<Vec<PublishEventInfo>>;
}
