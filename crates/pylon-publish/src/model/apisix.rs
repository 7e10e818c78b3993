//! Data-plane resource models
//!
//! Output-only value objects written to the registry. Maps are ordered so
//! the serialized payload of an unchanged resource is byte-identical across
//! publishes.

use std::collections::BTreeMap;

use pylon_registry::{RegistryResource, ResourceKind};
use serde::Serialize;

pub type PluginMap = BTreeMap<String, serde_json::Value>;
pub type LabelMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApisixTimeout {
    pub connect: u32,
    pub send: u32,
    pub read: u32,
}

impl ApisixTimeout {
    pub fn uniform(seconds: u32) -> Self {
        Self {
            connect: seconds,
            send: seconds,
            read: seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApisixNode {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApisixUpstream {
    #[serde(rename = "type")]
    pub lb_type: String,
    pub scheme: String,
    pub nodes: Vec<ApisixNode>,
    pub timeout: ApisixTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApisixService {
    pub id: String,
    pub name: String,
    pub labels: LabelMap,
    pub upstream: ApisixUpstream,
    pub plugins: PluginMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApisixRoute {
    pub id: String,
    pub name: String,
    pub uris: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub enable_websocket: bool,
    pub service_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<ApisixTimeout>,
    pub labels: LabelMap,
    pub plugins: PluginMap,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApisixSsl {
    pub id: String,
    pub snis: Vec<String>,
    pub cert: String,
    pub key: String,
    pub labels: LabelMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApisixProto {
    pub id: String,
    pub desc: String,
    pub content: String,
    pub labels: LabelMap,
}

/// Any resource the transformer produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApisixModel {
    Service(ApisixService),
    Route(ApisixRoute),
    Ssl(ApisixSsl),
    Proto(ApisixProto),
}

impl ApisixModel {
    pub fn id(&self) -> &str {
        match self {
            ApisixModel::Service(s) => &s.id,
            ApisixModel::Route(r) => &r.id,
            ApisixModel::Ssl(s) => &s.id,
            ApisixModel::Proto(p) => &p.id,
        }
    }
}

impl RegistryResource for ApisixModel {
    fn kind(&self) -> ResourceKind {
        match self {
            ApisixModel::Service(_) => ResourceKind::Service,
            ApisixModel::Route(_) => ResourceKind::Route,
            ApisixModel::Ssl(_) => ResourceKind::Ssl,
            ApisixModel::Proto(_) => ResourceKind::Proto,
        }
    }

    fn resource_id(&self) -> &str {
        self.id()
    }

    fn to_payload(&self) -> anyhow::Result<String> {
        let payload = match self {
            ApisixModel::Service(s) => serde_json::to_string(s)?,
            ApisixModel::Route(r) => serde_json::to_string(r)?,
            ApisixModel::Ssl(s) => serde_json::to_string(s)?,
            ApisixModel::Proto(p) => serde_json::to_string(p)?,
        };
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_payload_omits_unset_fields() {
        let route = ApisixModel::Route(ApisixRoute {
            id: "demo.prod.1".to_string(),
            name: "echo".to_string(),
            uris: vec!["/echo/".to_string()],
            methods: vec![],
            priority: None,
            enable_websocket: false,
            service_id: "stage-1-backend-2".to_string(),
            timeout: None,
            labels: LabelMap::new(),
            plugins: PluginMap::new(),
            status: 1,
        });

        let payload: serde_json::Value = serde_json::from_str(&route.to_payload().unwrap()).unwrap();
        assert!(payload.get("methods").is_none());
        assert!(payload.get("priority").is_none());
        assert!(payload.get("timeout").is_none());
        assert_eq!(payload["service_id"], "stage-1-backend-2");
        assert_eq!(route.kind(), ResourceKind::Route);
    }

    #[test]
    fn test_upstream_type_field_name() {
        let upstream = ApisixUpstream {
            lb_type: "roundrobin".to_string(),
            scheme: "http".to_string(),
            nodes: vec![],
            timeout: ApisixTimeout::uniform(30),
        };
        let value = serde_json::to_value(&upstream).unwrap();
        assert_eq!(value["type"], "roundrobin");
        assert_eq!(value["timeout"]["read"], 30);
    }
}
