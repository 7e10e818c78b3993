//! Registry key layout
//!
//! Every key lives under `<namespace>/<gateway>/<stage>/<api-version>/` so
//! that reconciliations of different gateway+stage targets never overlap.

use pylon_common::{PylonError, is_valid_key_segment};

/// Data-plane resource kinds, named by their key segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Route,
    Service,
    Ssl,
    Proto,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Route,
        ResourceKind::Service,
        ResourceKind::Ssl,
        ResourceKind::Proto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Route => "routes",
            ResourceKind::Service => "services",
            ResourceKind::Ssl => "ssls",
            ResourceKind::Proto => "protos",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routes" => Ok(ResourceKind::Route),
            "services" => Ok(ResourceKind::Service),
            "ssls" => Ok(ResourceKind::Ssl),
            "protos" => Ok(ResourceKind::Proto),
            _ => Err(format!("Invalid resource kind: {}", s)),
        }
    }
}

/// The key prefix owned by one gateway+stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryKeyPrefix {
    prefix: String,
}

impl RegistryKeyPrefix {
    pub fn new(
        namespace: &str,
        gateway: &str,
        stage: &str,
        api_version: &str,
    ) -> Result<Self, PylonError> {
        for (what, segment) in [
            ("gateway", gateway),
            ("stage", stage),
            ("api version", api_version),
        ] {
            if !is_valid_key_segment(segment) {
                return Err(PylonError::IllegalArgument(format!(
                    "{} '{}' cannot be used in a registry key",
                    what, segment
                )));
            }
        }

        let namespace = namespace.trim_end_matches('/');
        Ok(Self {
            prefix: format!("{}/{}/{}/{}", namespace, gateway, stage, api_version),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// Listing prefix; the trailing `/` keeps `gw/prod` from matching `gw/prod2`
    pub fn list_prefix(&self) -> String {
        format!("{}/", self.prefix)
    }

    pub fn resource_key(&self, kind: ResourceKind, id: &str) -> String {
        format!("{}/{}/{}", self.prefix, kind.as_str(), id)
    }

    /// Split a key under this prefix into kind and resource id
    pub fn parse_resource_key<'a>(&self, key: &'a str) -> Option<(ResourceKind, &'a str)> {
        let rest = key.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let (kind, id) = rest.split_once('/')?;
        if id.is_empty() {
            return None;
        }
        Some((kind.parse().ok()?, id))
    }
}

impl std::fmt::Display for RegistryKeyPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix)
    }
}
