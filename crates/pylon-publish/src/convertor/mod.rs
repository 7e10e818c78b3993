//! Snapshot to data-plane resource conversion
//!
//! Every convertor is a plain function over already loaded release parts,
//! so a conversion never reads storage and always sees one consistent
//! snapshot. Configuration problems surface as [`PylonError`]s that fail
//! the publish attempt.

pub mod plugin;
pub mod proto;
pub mod route;
pub mod service;
pub mod ssl;

use pylon_common::{MAX_RESOURCE_ID_LENGTH, bounded_id};
use pylon_persistence::{GatewayInfo, JwtKeyInfo, StageInfo};

use crate::model::apisix::LabelMap;

pub use plugin::{convert_plugin, convert_plugin_bindings};
pub use proto::convert_protos;
pub use route::{SUBPATH_PRIORITY_BASE, convert_routes, subpath_priority};
pub use service::convert_services;
pub use ssl::convert_ssls;

/// Label naming the control plane that owns a resource
pub const MANAGED_BY_LABEL: &str = "pylon.managed-by";

/// The release parts shared by every convertor
#[derive(Debug, Clone, Copy)]
pub struct ConvertContext<'a> {
    pub gateway: &'a GatewayInfo,
    pub stage: &'a StageInfo,
    pub jwt_key: Option<&'a JwtKeyInfo>,
    pub auth_config: Option<&'a serde_json::Value>,
}

impl<'a> ConvertContext<'a> {
    pub fn new(gateway: &'a GatewayInfo, stage: &'a StageInfo) -> Self {
        Self {
            gateway,
            stage,
            jwt_key: None,
            auth_config: None,
        }
    }

    pub fn with_jwt_key(mut self, jwt_key: Option<&'a JwtKeyInfo>) -> Self {
        self.jwt_key = jwt_key;
        self
    }

    pub fn with_auth_config(mut self, auth_config: Option<&'a serde_json::Value>) -> Self {
        self.auth_config = auth_config;
        self
    }

    /// Resource id scoped to the gateway and stage, e.g. `demo.prod.42`
    pub fn scoped_id(&self, suffix: &str) -> String {
        bounded_id(
            &format!("{}.{}.{}", self.gateway.name, self.stage.name, suffix),
            MAX_RESOURCE_ID_LENGTH,
        )
    }

    pub fn labels(&self) -> LabelMap {
        LabelMap::from([
            ("gateway".to_string(), self.gateway.name.clone()),
            ("stage".to_string(), self.stage.name.clone()),
            (MANAGED_BY_LABEL.to_string(), "pylon".to_string()),
        ])
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use pylon_common::Status;
    use pylon_persistence::{GatewayInfo, StageInfo};

    pub fn gateway(name: &str) -> GatewayInfo {
        GatewayInfo {
            id: 1,
            name: name.to_string(),
            tenant_id: "default".to_string(),
            status: Status::Active,
        }
    }

    pub fn stage(name: &str, vars: &[(&str, &str)]) -> StageInfo {
        StageInfo {
            id: 2,
            gateway_id: 1,
            name: name.to_string(),
            status: Status::Active,
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_scoped_id_is_bounded() {
        let gateway = gateway("demo");
        let stage = stage("prod", &[]);
        let ctx = ConvertContext::new(&gateway, &stage);
        assert_eq!(ctx.scoped_id("42"), "demo.prod.42");

        let long_gateway = super::test_support::gateway(&"g".repeat(80));
        let ctx = ConvertContext::new(&long_gateway, &stage);
        assert_eq!(ctx.scoped_id("42").len(), MAX_RESOURCE_ID_LENGTH);
    }

    #[test]
    fn test_labels() {
        let gateway = gateway("demo");
        let stage = stage("prod", &[]);
        let labels = ConvertContext::new(&gateway, &stage).labels();
        assert_eq!(labels["gateway"], "demo");
        assert_eq!(labels["stage"], "prod");
        assert_eq!(labels[MANAGED_BY_LABEL], "pylon");
    }
}
