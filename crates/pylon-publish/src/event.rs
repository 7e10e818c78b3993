//! Publish event reporting
//!
//! Every publish attempt owns a release history row; each step appends
//! DOING and then SUCCESS or FAILURE events to it. The latest event per
//! step is the step's state, and the attempt's state follows from those.

use std::collections::BTreeMap;
use std::sync::Arc;

use pylon_common::{PublishEventStatus, PublishStep};
use pylon_persistence::{PersistenceService, PublishEventInfo, ReleaseHistoryInfo};
use tracing::{debug, error};

/// State of one publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Doing,
    Success,
    Failure,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Doing => "doing",
            ReleaseStatus::Success => "success",
            ReleaseStatus::Failure => "failure",
        }
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive an attempt's state from its events, given in insertion order.
///
/// Any step whose latest event failed fails the attempt; a successful
/// distribution completes it; anything else is still in progress. An
/// attempt without events has no state.
pub fn derive_status(events: &[PublishEventInfo]) -> Option<ReleaseStatus> {
    if events.is_empty() {
        return None;
    }

    let mut latest: BTreeMap<PublishStep, PublishEventStatus> = BTreeMap::new();
    for event in events {
        latest.insert(event.step, event.status);
    }

    if latest
        .values()
        .any(|status| *status == PublishEventStatus::Failure)
    {
        Some(ReleaseStatus::Failure)
    } else if latest.get(&PublishStep::DistributeConfiguration)
        == Some(&PublishEventStatus::Success)
    {
        Some(ReleaseStatus::Success)
    } else {
        Some(ReleaseStatus::Doing)
    }
}

/// Writes the events of one attempt. Disabled reporters write nothing;
/// write failures are logged and never fail the attempt itself.
pub struct PublishEventReporter {
    persistence: Arc<dyn PersistenceService>,
    history: ReleaseHistoryInfo,
    enabled: bool,
}

impl PublishEventReporter {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        history: ReleaseHistoryInfo,
        enabled: bool,
    ) -> Self {
        Self {
            persistence,
            history,
            enabled,
        }
    }

    pub fn history(&self) -> &ReleaseHistoryInfo {
        &self.history
    }

    pub async fn doing(&self, step: PublishStep) {
        self.report(step, PublishEventStatus::Doing, "").await;
    }

    pub async fn success(&self, step: PublishStep, detail: &str) {
        self.report(step, PublishEventStatus::Success, detail).await;
    }

    pub async fn failure(&self, step: PublishStep, detail: &str) {
        self.report(step, PublishEventStatus::Failure, detail).await;
    }

    async fn report(&self, step: PublishStep, status: PublishEventStatus, detail: &str) {
        if !self.enabled {
            return;
        }

        match self
            .persistence
            .publish_event_create(&self.history, step, status, detail)
            .await
        {
            Ok(event) => debug!(
                publish_id = self.history.id,
                step = %step,
                status = %status,
                event_id = event.id,
                "Publish event recorded"
            ),
            Err(e) => error!(
                publish_id = self.history.id,
                step = %step,
                status = %status,
                error = %e,
                "Failed to record publish event"
            ),
        }
    }
}

/// The most recent attempt of a stage with its events
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub history: ReleaseHistoryInfo,
    pub events: Vec<PublishEventInfo>,
    pub status: Option<ReleaseStatus>,
}

/// Load the latest attempt of a stage, if any
pub async fn latest_attempt(
    persistence: &dyn PersistenceService,
    gateway_id: i64,
    stage_id: i64,
) -> anyhow::Result<Option<AttemptReport>> {
    let Some(history) = persistence
        .release_history_find_latest(gateway_id, stage_id)
        .await?
    else {
        return Ok(None);
    };
    let events = persistence.publish_event_find_by_history(history.id).await?;
    let status = derive_status(&events);

    Ok(Some(AttemptReport {
        history,
        events,
        status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_common::{PublishSource, Status};
    use pylon_persistence::{MemoryPersistService, ReleasePersistence};

    fn event(id: i64, step: PublishStep, status: PublishEventStatus) -> PublishEventInfo {
        PublishEventInfo {
            id,
            gateway_id: 1,
            stage_id: 2,
            publish_id: 3,
            step,
            status,
            detail: String::new(),
            created_time: id,
        }
    }

    #[test]
    fn test_derive_status() {
        use PublishEventStatus::*;
        use PublishStep::*;

        assert_eq!(derive_status(&[]), None);
        assert_eq!(
            derive_status(&[event(1, ValidateConfiguration, Doing)]),
            Some(ReleaseStatus::Doing)
        );
        assert_eq!(
            derive_status(&[
                event(1, ValidateConfiguration, Doing),
                event(2, ValidateConfiguration, Success),
                event(3, GenerateTask, Doing),
                event(4, GenerateTask, Failure),
            ]),
            Some(ReleaseStatus::Failure)
        );
        assert_eq!(
            derive_status(&[
                event(1, ValidateConfiguration, Success),
                event(2, GenerateTask, Success),
                event(3, DistributeConfiguration, Doing),
                event(4, DistributeConfiguration, Success),
            ]),
            Some(ReleaseStatus::Success)
        );
    }

    #[test]
    fn test_latest_event_per_step_wins() {
        use PublishEventStatus::*;
        use PublishStep::*;

        // a step that failed and was then reported again as doing
        let status = derive_status(&[
            event(1, ValidateConfiguration, Failure),
            event(2, ValidateConfiguration, Doing),
        ]);
        assert_eq!(status, Some(ReleaseStatus::Doing));
    }

    #[tokio::test]
    async fn test_disabled_reporter_writes_nothing() {
        let store = Arc::new(MemoryPersistService::new());
        let gateway_id = store.insert_gateway("demo", Status::Active);
        let stage_id = store.insert_stage(gateway_id, "prod", Status::Active, Default::default());
        let history = store
            .release_history_create(gateway_id, stage_id, 1, PublishSource::CliSync, "cli")
            .await
            .unwrap();

        let reporter = PublishEventReporter::new(store.clone(), history, false);
        reporter.doing(PublishStep::ValidateConfiguration).await;
        assert_eq!(store.publish_event_count(gateway_id), 0);

        let report = latest_attempt(&*store, gateway_id, stage_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, None);
    }

    #[tokio::test]
    async fn test_latest_attempt() {
        let store = Arc::new(MemoryPersistService::new());
        let gateway_id = store.insert_gateway("demo", Status::Active);
        let stage_id = store.insert_stage(gateway_id, "prod", Status::Active, Default::default());
        assert!(
            latest_attempt(&*store, gateway_id, stage_id)
                .await
                .unwrap()
                .is_none()
        );

        let history = store
            .release_history_create(gateway_id, stage_id, 1, PublishSource::VersionPublish, "admin")
            .await
            .unwrap();
        let reporter = PublishEventReporter::new(store.clone(), history, true);
        reporter.doing(PublishStep::ValidateConfiguration).await;
        reporter
            .failure(PublishStep::ValidateConfiguration, "boom")
            .await;

        let report = latest_attempt(&*store, gateway_id, stage_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.events[1].detail, "boom");
        assert_eq!(report.status, Some(ReleaseStatus::Failure));
    }
}
