// End-to-end publish tests against the in-memory persistence and registry
// backends

mod common;

use common::Fixture;
use pylon_common::{BindingSource, PublishEventStatus, PublishSource, PublishStep, Scope, Status};
use pylon_persistence::{PluginPersistence, ReleasePersistence};
use pylon_publish::event::latest_attempt;
use pylon_publish::{PublishState, ReleaseStatus};
use pylon_registry::ResourceKind;

#[tokio::test]
async fn test_single_resource_publishes_one_service_and_one_route() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;

    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    assert_eq!(outcome.state, PublishState::Success);
    let sync = outcome.sync.unwrap();
    assert_eq!(sync.applied.len(), 2);
    assert!(sync.deleted.is_empty());
    assert_eq!(fx.registry_store.put_count(), 2);
    assert_eq!(fx.registry_store.delete_count(), 0);

    let stored = fx.registry().list_resources().await.unwrap();
    let mut kinds: Vec<ResourceKind> = stored.iter().map(|r| r.kind).collect();
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(kinds, vec![ResourceKind::Route, ResourceKind::Service]);

    let route = stored.iter().find(|r| r.kind == ResourceKind::Route).unwrap();
    assert_eq!(route.payload["uris"], serde_json::json!(["/echo/"]));
    assert_eq!(route.payload["methods"], serde_json::json!(["GET"]));
}

#[tokio::test]
async fn test_events_follow_step_order() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;

    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    let report = latest_attempt(&*fx.store, fx.gateway_id, fx.stage_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Some(report.history.id), outcome.publish_id);
    assert_eq!(report.history.source, PublishSource::VersionPublish);
    assert_eq!(report.history.created_by, "admin");
    assert_eq!(report.status, Some(ReleaseStatus::Success));

    let trail: Vec<(PublishStep, PublishEventStatus)> =
        report.events.iter().map(|e| (e.step, e.status)).collect();
    assert_eq!(
        trail,
        vec![
            (PublishStep::ValidateConfiguration, PublishEventStatus::Doing),
            (PublishStep::ValidateConfiguration, PublishEventStatus::Success),
            (PublishStep::GenerateTask, PublishEventStatus::Doing),
            (PublishStep::GenerateTask, PublishEventStatus::Success),
            (PublishStep::DistributeConfiguration, PublishEventStatus::Doing),
            (PublishStep::DistributeConfiguration, PublishEventStatus::Success),
        ]
    );
}

#[tokio::test]
async fn test_republish_is_idempotent() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/"), fx.resource(101, "/ping/")])
        .await;

    let first = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();
    let keys_after_first = fx.keys().await;
    let resources_after_first = fx.registry().list_resources().await.unwrap();

    let second = fx
        .publisher
        .trigger_stage_publish(PublishSource::StageUpdate, "admin", fx.stage_id)
        .await
        .unwrap();

    assert!(first.is_success());
    assert!(second.is_success());
    let sync = second.sync.unwrap();
    assert!(sync.deleted.is_empty());
    assert_eq!(sync.applied.len(), 3);
    assert_eq!(fx.keys().await, keys_after_first);
    assert_eq!(fx.registry().list_resources().await.unwrap(), resources_after_first);
    assert_eq!(fx.registry_store.delete_count(), 0);
}

#[tokio::test]
async fn test_new_version_removes_dropped_routes() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/a/"), fx.resource(101, "/b/")])
        .await;
    fx.publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    fx.release("1.0.1", vec![fx.resource(101, "/b/"), fx.resource(102, "/c/")])
        .await;
    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.sync.unwrap().deleted, vec![fx.route_key(100)]);

    let mut expected = vec![fx.service_key(), fx.route_key(101), fx.route_key(102)];
    expected.sort();
    assert_eq!(fx.keys().await, expected);
}

#[tokio::test]
async fn test_failed_upsert_fails_distribution_until_repaired() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/a/"), fx.resource(101, "/b/")])
        .await;
    fx.registry_store.fail_key(&fx.route_key(101));

    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();
    assert_eq!(outcome.state, PublishState::Failure);
    assert!(outcome.reason.contains(&fx.route_key(101)));
    let sync = outcome.sync.unwrap();
    assert_eq!(sync.applied.len(), 2);
    assert_eq!(sync.failed_keys(), vec![fx.route_key(101).as_str()]);

    let report = latest_attempt(&*fx.store, fx.gateway_id, fx.stage_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, Some(ReleaseStatus::Failure));
    let last = report.events.last().unwrap();
    assert_eq!(last.step, PublishStep::DistributeConfiguration);
    assert_eq!(last.status, PublishEventStatus::Failure);

    fx.registry_store.heal_key(&fx.route_key(101));
    let retried = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();
    assert!(retried.is_success());
    assert!(retried.sync.unwrap().is_converged());
    assert_eq!(fx.keys().await.len(), 3);
}

#[tokio::test]
async fn test_failed_stale_delete_is_not_fatal() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/a/"), fx.resource(101, "/b/")])
        .await;
    fx.publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    fx.registry_store.fail_key(&fx.route_key(100));
    fx.release("1.0.1", vec![fx.resource(101, "/b/")]).await;
    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();
    assert!(outcome.is_success());
    let sync = outcome.sync.unwrap();
    assert!(!sync.is_converged());
    assert_eq!(sync.delete_failures[0].key, fx.route_key(100));
    assert!(fx.keys().await.contains(&fx.route_key(100)));

    // the next reconciliation removes the leftover
    fx.registry_store.heal_key(&fx.route_key(100));
    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::RollingUpdate, "system", fx.stage_id)
        .await
        .unwrap();
    assert_eq!(outcome.sync.unwrap().deleted, vec![fx.route_key(100)]);
    assert!(!fx.keys().await.contains(&fx.route_key(100)));
}

#[tokio::test]
async fn test_dropped_resource_loses_its_plugin_binding() {
    let fx = Fixture::new();
    let cors = fx
        .store
        .insert_plugin_config(fx.gateway_id, "cors", "pylon-cors", "allow_origins: '*'");

    let mut with_plugin = fx.resource(100, "/a/");
    with_plugin["plugins"] = serde_json::json!([{"config_id": cors, "type": "pylon-cors"}]);
    fx.release("1.0.0", vec![with_plugin, fx.resource(101, "/b/")])
        .await;
    fx.publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    let bindings = fx
        .store
        .plugin_binding_find_by_scope_type(fx.gateway_id, pylon_common::ScopeType::Resource)
        .await
        .unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].scope, Scope::Resource(100));
    assert_eq!(bindings[0].source, BindingSource::Direct);

    let route = fx
        .registry()
        .list_resources()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.id == "demo.prod.100")
        .unwrap();
    assert!(route.payload["plugins"].get("pylon-cors").is_some());

    fx.release("1.0.1", vec![fx.resource(101, "/b/")]).await;
    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.sync.unwrap().deleted, vec![fx.route_key(100)]);
    assert_eq!(fx.store.plugin_binding_count(fx.gateway_id), 0);
}

/// A second stage of the fixture gateway, released to `resources`
async fn second_stage(fx: &Fixture, version: &str, resources: Vec<serde_json::Value>) -> i64 {
    let stage_id = fx
        .store
        .insert_stage(fx.gateway_id, "prod2", Status::Active, Default::default());
    fx.store.set_backend_config(
        fx.backend_id,
        stage_id,
        pylon_persistence::BackendConfig {
            hosts: vec![pylon_persistence::BackendHost {
                scheme: "http".to_string(),
                host: "10.0.0.2".to_string(),
                weight: 100,
            }],
            ..Default::default()
        },
    );
    let version_id = fx.store.insert_resource_version(
        fx.gateway_id,
        version,
        "2.0",
        &serde_json::Value::Array(resources),
    );
    fx.store
        .release_upsert(fx.gateway_id, stage_id, version_id, "admin")
        .await
        .unwrap();
    stage_id
}

#[tokio::test]
async fn test_resource_released_to_another_stage_keeps_its_binding() {
    let fx = Fixture::new();
    let cors = fx
        .store
        .insert_plugin_config(fx.gateway_id, "cors", "pylon-cors", "allow_origins: '*'");
    let mut with_plugin = fx.resource(100, "/a/");
    with_plugin["plugins"] = serde_json::json!([{"config_id": cors, "type": "pylon-cors"}]);
    fx.release("1.0.0", vec![with_plugin]).await;
    second_stage(&fx, "0.9.0", vec![fx.resource(101, "/b/")]).await;

    let outcomes = fx
        .publisher
        .trigger_publish(PublishSource::VersionPublish, "admin", fx.gateway_id)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_success()));

    // the other stage does not release resource 100
    fx.publisher
        .trigger_publish(PublishSource::RollingUpdate, "system", fx.gateway_id)
        .await
        .unwrap();
    assert_eq!(fx.store.plugin_binding_count(fx.gateway_id), 1);
    let route = fx
        .registry()
        .list_resources()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.id == "demo.prod.100")
        .unwrap();
    assert!(route.payload["plugins"].get("pylon-cors").is_some());
}

#[tokio::test]
async fn test_failing_stage_does_not_stop_the_others() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;
    let other_stage = second_stage(&fx, "1.0.1", vec![fx.resource(200, "/other/")]).await;
    fx.store.set_fail_release_history(fx.stage_id, true);

    let outcomes = fx
        .publisher
        .trigger_publish(PublishSource::VersionPublish, "admin", fx.gateway_id)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);

    let failed = outcomes.iter().find(|o| o.stage_id == fx.stage_id).unwrap();
    assert_eq!(failed.state, PublishState::Failure);
    assert_eq!(failed.publish_id, None);
    assert!(failed.reason.contains("rejected by storage"));

    let published = outcomes.iter().find(|o| o.stage_id == other_stage).unwrap();
    assert!(published.is_success());
    assert!(fx.keys().await.is_empty());
    assert_eq!(fx.registry_store.len(), 2);
}

#[tokio::test]
async fn test_inactive_gateway_is_skipped_without_events() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;
    fx.store.set_gateway_status(fx.gateway_id, Status::Inactive);

    let outcomes = fx
        .publisher
        .trigger_publish(PublishSource::VersionPublish, "admin", fx.gateway_id)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state, PublishState::Skipped);
    assert!(outcomes[0].reason.contains("not active"));
    assert_eq!(outcomes[0].publish_id, None);
    assert_eq!(fx.store.publish_event_count(fx.gateway_id), 0);
    assert_eq!(fx.store.release_history_count(fx.gateway_id), 0);
    assert!(fx.registry_store.is_empty());
}

#[tokio::test]
async fn test_stage_without_release_is_skipped() {
    let fx = Fixture::new();

    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::StageUpdate, "admin", fx.stage_id)
        .await
        .unwrap();

    assert_eq!(outcome.state, PublishState::Skipped);
    assert!(outcome.reason.contains("no release"));
}

#[tokio::test]
async fn test_ip_restriction_without_lists_fails_generation() {
    let fx = Fixture::new();
    let restriction = fx.store.insert_plugin_config(
        fx.gateway_id,
        "office-only",
        "pylon-ip-restriction",
        "whitelist: ''\n",
    );
    fx.store.insert_plugin_binding(
        fx.gateway_id,
        Scope::Stage(fx.stage_id),
        restriction,
        BindingSource::Direct,
    );
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;

    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    assert_eq!(outcome.state, PublishState::Failure);
    assert!(outcome.reason.contains("pylon-ip-restriction"));
    assert!(fx.registry_store.is_empty());

    let report = latest_attempt(&*fx.store, fx.gateway_id, fx.stage_id)
        .await
        .unwrap()
        .unwrap();
    let last = report.events.last().unwrap();
    assert_eq!(last.step, PublishStep::GenerateTask);
    assert_eq!(last.status, PublishEventStatus::Failure);
}

#[tokio::test]
async fn test_legacy_schema_fails_validation() {
    let fx = Fixture::new();
    let version_id = fx.store.insert_resource_version(
        fx.gateway_id,
        "0.9.0",
        "1.0",
        &serde_json::json!([fx.resource(100, "/echo/")]),
    );
    let outcome = fx
        .publisher
        .release("admin", fx.stage_id, version_id)
        .await
        .unwrap();

    assert_eq!(outcome.state, PublishState::Failure);
    assert!(outcome.reason.contains("not supported"));
    let report = latest_attempt(&*fx.store, fx.gateway_id, fx.stage_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.events.last().unwrap().step, PublishStep::ValidateConfiguration);
    assert!(fx.registry_store.is_empty());
}

#[tokio::test]
async fn test_binding_batch_failure_aborts_attempt() {
    let fx = Fixture::new();
    let cors = fx
        .store
        .insert_plugin_config(fx.gateway_id, "cors", "pylon-cors", "allow_origins: '*'");
    let mut with_plugin = fx.resource(100, "/a/");
    with_plugin["plugins"] = serde_json::json!([{"config_id": cors, "type": "pylon-cors"}]);
    fx.release("1.0.0", vec![with_plugin]).await;
    fx.store.set_fail_binding_batches(true);

    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    assert_eq!(outcome.state, PublishState::Failure);
    assert_eq!(fx.store.plugin_binding_count(fx.gateway_id), 0);
    assert!(fx.registry_store.is_empty());
}

#[tokio::test]
async fn test_cli_sync_records_history_without_events() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;

    let outcomes = fx
        .publisher
        .trigger_publish(PublishSource::CliSync, "cli", fx.gateway_id)
        .await
        .unwrap();

    assert!(outcomes[0].is_success());
    assert_eq!(fx.store.release_history_count(fx.gateway_id), 1);
    assert_eq!(fx.store.publish_event_count(fx.gateway_id), 0);
    assert_eq!(fx.keys().await.len(), 2);

    let report = latest_attempt(&*fx.store, fx.gateway_id, fx.stage_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.history.source, PublishSource::CliSync);
    assert_eq!(report.status, None);
}

#[tokio::test]
async fn test_gateway_disable_revokes_every_stage() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;
    fx.publisher
        .trigger_publish(PublishSource::VersionPublish, "admin", fx.gateway_id)
        .await
        .unwrap();
    assert_eq!(fx.registry_store.len(), 2);

    fx.store.set_gateway_status(fx.gateway_id, Status::Inactive);
    let outcomes = fx
        .publisher
        .trigger_publish(PublishSource::GatewayDisable, "admin", fx.gateway_id)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].sync.as_ref().unwrap().deleted.len(), 2);
    assert!(fx.registry_store.is_empty());

    let report = latest_attempt(&*fx.store, fx.gateway_id, fx.stage_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.history.source, PublishSource::GatewayDisable);
    assert_eq!(report.status, Some(ReleaseStatus::Success));
}

#[tokio::test]
async fn test_stage_delete_revokes_only_that_stage() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;
    fx.publisher
        .trigger_stage_publish(PublishSource::VersionPublish, "admin", fx.stage_id)
        .await
        .unwrap();

    // a second stage whose keys must survive
    let other_stage =
        fx.store
            .insert_stage(fx.gateway_id, "prod2", Status::Active, Default::default());
    fx.store.set_backend_config(
        fx.backend_id,
        other_stage,
        pylon_persistence::BackendConfig {
            hosts: vec![pylon_persistence::BackendHost {
                scheme: "http".to_string(),
                host: "10.0.0.2".to_string(),
                weight: 100,
            }],
            ..Default::default()
        },
    );
    let version_id = fx.store.insert_resource_version(
        fx.gateway_id,
        "1.0.1",
        "2.0",
        &serde_json::json!([fx.resource(200, "/other/")]),
    );
    fx.publisher
        .release("admin", other_stage, version_id)
        .await
        .unwrap();
    assert_eq!(fx.registry_store.len(), 4);

    let outcome = fx
        .publisher
        .trigger_stage_publish(PublishSource::StageDelete, "admin", fx.stage_id)
        .await
        .unwrap();
    fx.store.delete_stage(fx.stage_id);

    assert!(outcome.is_success());
    assert!(fx.keys().await.is_empty());
    assert_eq!(fx.registry_store.len(), 2);
}

#[tokio::test]
async fn test_release_rejects_foreign_version() {
    let fx = Fixture::new();
    let other_gateway = fx.store.insert_gateway("other", Status::Active);
    let version_id = fx.store.insert_resource_version(
        other_gateway,
        "1.0.0",
        "2.0",
        &serde_json::json!([]),
    );

    let err = fx
        .publisher
        .release("admin", fx.stage_id, version_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not belong"));
}

#[tokio::test]
async fn test_concurrent_publishes_of_one_stage() {
    let fx = Fixture::new();
    fx.release("1.0.0", vec![fx.resource(100, "/echo/")]).await;

    let (a, b) = tokio::join!(
        fx.publisher
            .trigger_stage_publish(PublishSource::StageUpdate, "admin", fx.stage_id),
        fx.publisher
            .trigger_stage_publish(PublishSource::BackendUpdate, "admin", fx.stage_id),
    );

    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
    assert_eq!(fx.store.release_history_count(fx.gateway_id), 2);
    assert_eq!(fx.keys().await.len(), 2);
    assert_eq!(fx.registry_store.delete_count(), 0);
}
