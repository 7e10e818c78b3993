//! Resources as stored in a resource version

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One route definition inside a resource version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// HTTP method, `ANY` for every method
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub match_subpath: bool,
    #[serde(default)]
    pub enable_websocket: bool,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub auth_config: ResourceAuthConfig,
    pub proxy: ResourceProxy,
    /// Plugin configs bound to this resource by the version
    #[serde(default)]
    pub plugins: Vec<ResourcePlugin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAuthConfig {
    #[serde(default = "default_true")]
    pub app_verified_required: bool,
    #[serde(default = "default_true")]
    pub auth_verified_required: bool,
    #[serde(default = "default_true")]
    pub resource_perm_required: bool,
}

impl Default for ResourceAuthConfig {
    fn default() -> Self {
        Self {
            app_verified_required: true,
            auth_verified_required: true,
            resource_perm_required: true,
        }
    }
}

/// Where the data plane forwards matching requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProxy {
    pub backend_id: i64,
    pub method: String,
    /// Backend path; may reference stage vars as `{env.NAME}`
    pub path: String,
    #[serde(default)]
    pub match_subpath: bool,
    /// Seconds; overrides the backend timeouts for this route when set
    #[serde(default)]
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePlugin {
    pub config_id: i64,
    #[serde(rename = "type")]
    pub type_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_resource() {
        let resource: ResourceData = serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "echo",
            "method": "GET",
            "path": "/echo/",
            "proxy": {"backend_id": 2, "method": "GET", "path": "/echo/"}
        }))
        .unwrap();

        assert!(!resource.match_subpath);
        assert!(resource.auth_config.app_verified_required);
        assert!(resource.plugins.is_empty());
        assert_eq!(resource.proxy.timeout, None);
    }

    #[test]
    fn test_deserialize_resource_plugins() {
        let resource: ResourceData = serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "echo",
            "method": "ANY",
            "path": "/echo/",
            "proxy": {"backend_id": 2, "method": "GET", "path": "/echo/", "timeout": 5},
            "plugins": [{"config_id": 7, "type": "pylon-cors"}]
        }))
        .unwrap();

        assert_eq!(resource.plugins[0].type_code, "pylon-cors");
        assert_eq!(resource.proxy.timeout, Some(5));
    }
}
