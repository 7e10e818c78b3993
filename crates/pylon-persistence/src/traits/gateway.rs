//! Gateway persistence trait
//!
//! Read access to gateways, stages and the stage-scoped entities a release
//! is assembled from.

use async_trait::async_trait;

use crate::model::{
    BackendConfigInfo, GatewayInfo, JwtKeyInfo, ProtoInfo, SslCertificateInfo, StageInfo,
};

#[async_trait]
pub trait GatewayPersistence: Send + Sync {
    async fn gateway_find_by_id(&self, gateway_id: i64) -> anyhow::Result<Option<GatewayInfo>>;

    /// All gateways ordered by id
    async fn gateway_find_all(&self) -> anyhow::Result<Vec<GatewayInfo>>;

    async fn stage_find_by_id(&self, stage_id: i64) -> anyhow::Result<Option<StageInfo>>;

    /// Stages of a gateway ordered by id
    async fn stage_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<StageInfo>>;

    /// Backend configs of a stage ordered by backend id
    async fn backend_config_find_by_stage(
        &self,
        stage_id: i64,
    ) -> anyhow::Result<Vec<BackendConfigInfo>>;

    async fn jwt_key_find(&self, gateway_id: i64) -> anyhow::Result<Option<JwtKeyInfo>>;

    /// Raw JSON auth config of a gateway
    async fn gateway_auth_config_find(&self, gateway_id: i64) -> anyhow::Result<Option<String>>;

    /// Certificates of a stage ordered by id
    async fn ssl_certificate_find_by_stage(
        &self,
        stage_id: i64,
    ) -> anyhow::Result<Vec<SslCertificateInfo>>;

    /// Proto descriptors of a gateway ordered by id
    async fn proto_find_by_gateway(&self, gateway_id: i64) -> anyhow::Result<Vec<ProtoInfo>>;
}
