//! Deferred rolling updates
//!
//! Mutations that change what a gateway publishes mark the gateway dirty
//! instead of publishing inline. A periodic sweep drains the dirty set and
//! rolls every stage of each gateway forward, so a burst of edits costs one
//! publish.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use pylon_common::{ChangeKind, PublishSource};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::publisher::{PublishOutcome, Publisher, SYSTEM_OPERATOR};

/// Set of gateways awaiting a rolling update
#[derive(Debug, Default)]
pub struct DirtyGatewayQueue {
    gateways: DashSet<i64>,
}

impl DirtyGatewayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&self, change: ChangeKind, gateway_id: i64) {
        let newly_dirty = self.gateways.insert(gateway_id);
        debug!(gateway_id, change = %change, newly_dirty, "Gateway marked dirty");
    }

    /// Take every dirty gateway, in id order
    pub fn drain(&self) -> Vec<i64> {
        let mut drained: Vec<i64> = self.gateways.iter().map(|id| *id).collect();
        drained.retain(|id| self.gateways.remove(id).is_some());
        drained.sort_unstable();
        drained
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

/// Background sweep publishing dirty gateways
pub struct RollingUpdateWorker {
    queue: Arc<DirtyGatewayQueue>,
    publisher: Arc<Publisher>,
    sweep_interval_ms: u64,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl RollingUpdateWorker {
    pub fn new(
        queue: Arc<DirtyGatewayQueue>,
        publisher: Arc<Publisher>,
        sweep_interval_ms: u64,
    ) -> Self {
        Self {
            queue,
            publisher,
            sweep_interval_ms,
            shutdown_tx: None,
        }
    }

    /// Publish every gateway currently dirty. A gateway that cannot be
    /// published is logged and dropped; the next change marks it again.
    pub async fn sweep_once(&self) -> Vec<PublishOutcome> {
        sweep(&self.queue, &self.publisher).await
    }

    /// Start the periodic sweep
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.shutdown_tx.is_some() {
            return Err(anyhow::anyhow!("Rolling update worker already started"));
        }
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let queue = self.queue.clone();
        let publisher = self.publisher.clone();
        let interval_ms = self.sweep_interval_ms.max(1);

        info!(sweep_interval_ms = interval_ms, "Starting rolling update worker");

        tokio::spawn(async move {
            let mut sweep_interval = tokio::time::interval(Duration::from_millis(interval_ms));

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Rolling update worker shutting down");
                        break;
                    }
                    _ = sweep_interval.tick() => {
                        sweep(&queue, &publisher).await;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the periodic sweep
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

async fn sweep(queue: &DirtyGatewayQueue, publisher: &Publisher) -> Vec<PublishOutcome> {
    let gateways = queue.drain();
    if gateways.is_empty() {
        return Vec::new();
    }
    debug!(gateways = ?gateways, "Sweeping dirty gateways");

    let mut outcomes = Vec::new();
    for gateway_id in gateways {
        match publisher
            .trigger_publish(PublishSource::RollingUpdate, SYSTEM_OPERATOR, gateway_id)
            .await
        {
            Ok(published) => outcomes.extend(published),
            Err(e) => error!(gateway_id, error = %e, "Rolling update failed"),
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{PublishState, PublisherConfig};
    use pylon_common::Status;
    use pylon_persistence::{MemoryPersistService, ReleasePersistence};
    use pylon_registry::MemoryRegistryStore;

    #[test]
    fn test_mark_dirty_deduplicates() {
        let queue = DirtyGatewayQueue::new();
        queue.mark_dirty(ChangeKind::Stage, 7);
        queue.mark_dirty(ChangeKind::PluginConfig, 3);
        queue.mark_dirty(ChangeKind::JwtKey, 7);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.drain(), vec![3, 7]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_publishes_dirty_gateways() {
        let store = Arc::new(MemoryPersistService::new());
        let gateway_id = store.insert_gateway("demo", Status::Active);
        let stage_id = store.insert_stage(gateway_id, "prod", Status::Active, Default::default());
        let version_id =
            store.insert_resource_version(gateway_id, "1.0.0", "2.0", &serde_json::json!([]));
        store
            .release_upsert(gateway_id, stage_id, version_id, "admin")
            .await
            .unwrap();

        let publisher = Arc::new(Publisher::new(
            store.clone(),
            Arc::new(MemoryRegistryStore::new()),
            PublisherConfig::default(),
        ));
        let queue = Arc::new(DirtyGatewayQueue::new());
        let worker = RollingUpdateWorker::new(queue.clone(), publisher, 1000);

        assert!(worker.sweep_once().await.is_empty());

        queue.mark_dirty(ChangeKind::Stage, gateway_id);
        // unknown gateways are logged and skipped
        queue.mark_dirty(ChangeKind::Stage, 999);
        let outcomes = worker.sweep_once().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].source, PublishSource::RollingUpdate);
        assert_eq!(outcomes[0].state, PublishState::Success);
        assert!(queue.is_empty());
        assert_eq!(store.release_history_count(gateway_id), 1);
    }

    #[tokio::test]
    async fn test_worker_start_and_stop() {
        let store = Arc::new(MemoryPersistService::new());
        let gateway_id = store.insert_gateway("demo", Status::Active);
        store.insert_stage(gateway_id, "prod", Status::Active, Default::default());

        let publisher = Arc::new(Publisher::new(
            store.clone(),
            Arc::new(MemoryRegistryStore::new()),
            PublisherConfig::default(),
        ));
        let queue = Arc::new(DirtyGatewayQueue::new());
        let mut worker = RollingUpdateWorker::new(queue.clone(), publisher, 10);

        worker.start().unwrap();
        assert!(worker.start().is_err());

        queue.mark_dirty(ChangeKind::PluginBinding, gateway_id);
        for _ in 0..100 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queue.is_empty());

        worker.stop().await;
    }
}
