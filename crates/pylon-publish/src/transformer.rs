//! Runs every convertor over one release snapshot

use std::collections::HashMap;

use tracing::debug;

use crate::convertor::{
    ConvertContext, convert_protos, convert_routes, convert_services, convert_ssls,
    service::service_id,
};
use crate::model::ApisixModel;
use crate::snapshot::ReleaseData;

pub struct ResourceTransformer<'a> {
    data: &'a ReleaseData,
}

impl<'a> ResourceTransformer<'a> {
    pub fn new(data: &'a ReleaseData) -> Self {
        Self { data }
    }

    /// The full resource set of the release: services first so every
    /// route's service exists by the time the route is written, then
    /// routes, certificates and proto descriptors.
    pub async fn transform(&self) -> anyhow::Result<Vec<ApisixModel>> {
        let data = self.data;
        let gateway = data.gateway().await?;
        let stage = data.stage().await?;
        let ctx = ConvertContext::new(gateway, stage)
            .with_jwt_key(data.jwt_key().await?)
            .with_auth_config(data.gateway_auth_config().await?);

        let backends = data.backend_configs().await?;
        let services = convert_services(&ctx, backends, data.stage_plugins().await?)?;
        let service_ids: HashMap<i64, String> = backends
            .iter()
            .filter(|b| !b.config.hosts.is_empty())
            .map(|b| (b.backend_id, service_id(stage.id, b.backend_id)))
            .collect();

        let routes = convert_routes(
            &ctx,
            data.resources(),
            data.resource_plugins().await?,
            &service_ids,
        )?;
        let ssls = convert_ssls(&ctx, data.ssl_certificates().await?);
        let protos = convert_protos(&ctx, data.protos().await?);

        debug!(
            gateway = %gateway.name,
            stage = %stage.name,
            services = services.len(),
            routes = routes.len(),
            ssls = ssls.len(),
            protos = protos.len(),
            "Release transformed"
        );

        let mut models = Vec::with_capacity(services.len() + routes.len() + ssls.len() + protos.len());
        models.extend(services.into_iter().map(ApisixModel::Service));
        models.extend(routes.into_iter().map(ApisixModel::Route));
        models.extend(ssls.into_iter().map(ApisixModel::Ssl));
        models.extend(protos.into_iter().map(ApisixModel::Proto));
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use pylon_common::{BindingSource, PylonError, Scope, Status};
    use pylon_persistence::{
        BackendConfig, BackendHost, MemoryPersistService, ReleasePersistence,
    };
    use pylon_registry::RegistryResource;

    async fn release_data(
        store: &Arc<MemoryPersistService>,
        resources: impl FnOnce(i64) -> serde_json::Value,
    ) -> ReleaseData {
        let gateway_id = store.insert_gateway("demo", Status::Active);
        let stage_id = store.insert_stage(
            gateway_id,
            "prod",
            Status::Active,
            [("prefix".to_string(), "v1".to_string())].into(),
        );
        let backend_id = store.insert_backend(gateway_id, "default");
        store.set_backend_config(
            backend_id,
            stage_id,
            BackendConfig {
                hosts: vec![BackendHost {
                    scheme: "http".to_string(),
                    host: "10.0.0.1:8080".to_string(),
                    weight: 100,
                }],
                ..Default::default()
            },
        );
        let cors = store.insert_plugin_config(gateway_id, "cors", "pylon-cors", "allow_origins: '*'");
        store.insert_plugin_binding(gateway_id, Scope::Stage(stage_id), cors, BindingSource::Direct);
        store.insert_ssl_certificate(
            gateway_id,
            stage_id,
            "example",
            vec!["example.com".to_string()],
            "cert",
            "key",
        );

        let version_id =
            store.insert_resource_version(gateway_id, "1.0.0", "2.0", &resources(backend_id));
        let release = store
            .release_upsert(gateway_id, stage_id, version_id, "admin")
            .await
            .unwrap();
        ReleaseData::load(store.clone(), release).await.unwrap()
    }

    #[tokio::test]
    async fn test_transform_release() {
        let store = Arc::new(MemoryPersistService::new());
        let data = release_data(
            &store,
            |backend_id| {
                serde_json::json!([{
                    "id": 100,
                    "name": "users",
                    "method": "GET",
                    "path": "/users/{id}/",
                    "proxy": {"backend_id": backend_id, "method": "GET", "path": "/{env.prefix}/users/"}
                }])
            },
        )
        .await;

        let models = ResourceTransformer::new(&data).transform().await.unwrap();
        let kinds: Vec<&str> = models.iter().map(|m| m.kind().as_str()).collect();
        assert_eq!(kinds, vec!["services", "routes", "ssls"]);

        let ApisixModel::Service(service) = &models[0] else {
            panic!("expected a service first");
        };
        assert!(service.plugins.contains_key("pylon-cors"));
        let ApisixModel::Route(route) = &models[1] else {
            panic!("expected a route second");
        };
        assert_eq!(route.service_id, service.id);
    }

    #[tokio::test]
    async fn test_route_to_unknown_backend_fails() {
        let store = Arc::new(MemoryPersistService::new());
        let data = release_data(
            &store,
            |_| {
                serde_json::json!([{
                    "id": 100,
                    "name": "users",
                    "method": "GET",
                    "path": "/users/",
                    "proxy": {"backend_id": 999, "method": "GET", "path": "/users/"}
                }])
            },
        )
        .await;

        let err = ResourceTransformer::new(&data).transform().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PylonError>(),
            Some(PylonError::InvalidBackend(_))
        ));
    }
}
