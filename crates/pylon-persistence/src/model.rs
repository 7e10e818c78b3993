//! Domain model types for the persistence abstraction layer
//!
//! These types are used as return values from the persistence traits,
//! decoupled from specific storage backends.

use std::collections::BTreeMap;

use pylon_common::{
    BindingSource, PublishEventStatus, PublishSource, PublishStep, Scope, Status,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfo {
    pub id: i64,
    pub name: String,
    pub tenant_id: String,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub name: String,
    pub status: Status,
    /// Template variables referenced as `{env.NAME}` by backend paths
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceVersionInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub version: String,
    pub schema_version: String,
    /// Raw JSON list of resources
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub stage_id: i64,
    pub resource_version_id: i64,
    pub updated_by: String,
    pub updated_time: i64,
}

/// One upstream host of a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHost {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_weight() -> u32 {
    100
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTimeout {
    pub connect: u32,
    pub send: u32,
    pub read: u32,
}

impl Default for BackendTimeout {
    fn default() -> Self {
        Self {
            connect: 60,
            send: 60,
            read: 60,
        }
    }
}

/// Stage-specific configuration of one backend, stored as JSON
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_load_balance")]
    pub load_balance: String,
    #[serde(default)]
    pub timeout: BackendTimeout,
    #[serde(default)]
    pub hosts: Vec<BackendHost>,
}

fn default_load_balance() -> String {
    "roundrobin".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfigInfo {
    pub backend_id: i64,
    pub backend_name: String,
    pub stage_id: i64,
    pub config: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtKeyInfo {
    pub gateway_id: i64,
    pub private_key: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslCertificateInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub stage_id: i64,
    pub name: String,
    pub snis: Vec<String>,
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfigInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub name: String,
    pub type_code: String,
    pub yaml: String,
}

/// A binding joined with its config and plugin type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginBindingInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub scope: Scope,
    pub config_id: i64,
    pub config_name: String,
    pub type_code: String,
    pub yaml: String,
    pub source: BindingSource,
    pub updated_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPluginBinding {
    pub gateway_id: i64,
    pub scope: Scope,
    pub config_id: i64,
    pub source: BindingSource,
}

/// Point an existing binding at a (possibly different) config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginBindingUpdate {
    pub binding_id: i64,
    pub config_id: i64,
    /// Source the binding carries afterwards
    pub source: BindingSource,
}

/// Binding mutations committed as one all-or-nothing unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginBindingBatch {
    pub creates: Vec<NewPluginBinding>,
    pub updates: Vec<PluginBindingUpdate>,
    pub deletes: Vec<i64>,
}

impl PluginBindingBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseHistoryInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub stage_id: i64,
    pub resource_version_id: i64,
    pub source: PublishSource,
    pub created_by: String,
    pub created_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEventInfo {
    pub id: i64,
    pub gateway_id: i64,
    pub stage_id: i64,
    pub publish_id: i64,
    pub step: PublishStep,
    pub status: PublishEventStatus,
    pub detail: String,
    pub created_time: i64,
}

/// Storage mode for the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// External database (MySQL/PostgreSQL via SeaORM)
    ExternalDb,
    /// In-process tables, lost on restart
    Memory,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::ExternalDb => write!(f, "external_db"),
            StorageMode::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "external_db" | "mysql" | "postgresql" => Ok(StorageMode::ExternalDb),
            "memory" => Ok(StorageMode::Memory),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}
