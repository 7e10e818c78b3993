//! Pylon Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Pylon components:
//! - Error types
//! - Scope, status and publish-source enums
//! - Utility functions
//! - Common constants

pub mod error;
pub mod publish;
pub mod utils;

// Re-exports for convenience
pub use error::PylonError;
pub use publish::{ChangeKind, PublishEventStatus, PublishSource, PublishStep};
pub use utils::{bounded_id, is_valid_key_segment, MAX_RESOURCE_ID_LENGTH};

/// The only resource version schema the conversion path accepts
pub const CURRENT_SCHEMA_VERSION: &str = "2.0";

/// Default registry namespace prefix
pub const DEFAULT_KEY_PREFIX: &str = "/pylon";

/// Default data-plane API version segment in registry keys
pub const DEFAULT_API_VERSION: &str = "v2";

/// Scope kinds a plugin can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeType {
    Stage,
    Resource,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Stage => "stage",
            ScopeType::Resource => "resource",
        }
    }
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScopeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage" => Ok(ScopeType::Stage),
            "resource" => Ok(ScopeType::Resource),
            _ => Err(format!("Invalid scope type: {}", s)),
        }
    }
}

/// A plugin binding target. Used directly as a map key by the resolver and
/// the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Stage(i64),
    Resource(i64),
}

impl Scope {
    pub fn new(scope_type: ScopeType, id: i64) -> Self {
        match scope_type {
            ScopeType::Stage => Scope::Stage(id),
            ScopeType::Resource => Scope::Resource(id),
        }
    }

    pub fn scope_type(&self) -> ScopeType {
        match self {
            Scope::Stage(_) => ScopeType::Stage,
            Scope::Resource(_) => ScopeType::Resource,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Scope::Stage(id) | Scope::Resource(id) => *id,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scope_type(), self.id())
    }
}

/// Active/inactive status shared by gateways and stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Inactive,
    Active,
}

impl Status {
    pub fn code(&self) -> i16 {
        match self {
            Status::Inactive => 0,
            Status::Active => 1,
        }
    }

    /// Unknown codes are treated as inactive so they can never be published.
    pub fn from_code(code: i16) -> Self {
        if code == 1 {
            Status::Active
        } else {
            Status::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        *self == Status::Active
    }
}

/// Where a plugin binding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum BindingSource {
    /// Derived from a pre-plugin access strategy
    Legacy,
    #[default]
    Direct,
}

impl BindingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingSource::Legacy => "legacy",
            BindingSource::Direct => "direct",
        }
    }
}

impl std::fmt::Display for BindingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BindingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(BindingSource::Legacy),
            "direct" => Ok(BindingSource::Direct),
            _ => Err(format!("Invalid binding source: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_round_trips_through_type_and_id() {
        let scope = Scope::new(ScopeType::Resource, 42);
        assert_eq!(scope, Scope::Resource(42));
        assert_eq!(scope.scope_type(), ScopeType::Resource);
        assert_eq!(scope.id(), 42);
        assert_eq!(scope.to_string(), "resource:42");
    }

    #[test]
    fn test_scope_type_from_str() {
        assert_eq!("stage".parse::<ScopeType>(), Ok(ScopeType::Stage));
        assert!("gateway".parse::<ScopeType>().is_err());
    }

    #[test]
    fn test_status_codes() {
        assert!(Status::from_code(1).is_active());
        assert!(!Status::from_code(0).is_active());
        assert!(!Status::from_code(7).is_active());
        assert_eq!(Status::Active.code(), 1);
    }

    #[test]
    fn test_direct_binding_source_ranks_above_legacy() {
        assert!(BindingSource::Direct > BindingSource::Legacy);
        assert_eq!("legacy".parse::<BindingSource>(), Ok(BindingSource::Legacy));
    }
}
