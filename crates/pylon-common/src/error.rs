//! Error types for Pylon
//!
//! `PylonError` covers the domain failures of the publish pipeline. Service
//! boundaries return `anyhow::Result` and wrap these where callers need to
//! inspect the failure kind (see [`PylonError::is_configuration_error`]).

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum PylonError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("{0} not exist")]
    NotFound(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("registry error: {0}")]
    RegistryError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("unrecognized upstream scheme '{scheme}' for host '{host}'")]
    InvalidUpstreamScheme { scheme: String, host: String },

    #[error("invalid backend configuration: {0}")]
    InvalidBackend(String),

    #[error("invalid config for plugin '{plugin_type}': {reason}")]
    InvalidPluginConfig { plugin_type: String, reason: String },

    #[error("duplicate app code '{0}' in rate limit overrides")]
    DuplicateAppCode(String),

    #[error("resource version schema '{0}' is not supported, migrate it before releasing")]
    UnsupportedSchema(String),

    #[error("stage var '{0}' is not defined")]
    MissingStageVar(String),
}

impl PylonError {
    /// Errors caused by operator-supplied configuration rather than
    /// infrastructure. These abort a publish attempt and are never retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PylonError::InvalidUpstreamScheme { .. }
                | PylonError::InvalidBackend(_)
                | PylonError::InvalidPluginConfig { .. }
                | PylonError::DuplicateAppCode(_)
                | PylonError::UnsupportedSchema(_)
                | PylonError::MissingStageVar(_)
        )
    }

    pub fn invalid_plugin_config(plugin_type: &str, reason: impl Into<String>) -> Self {
        PylonError::InvalidPluginConfig {
            plugin_type: plugin_type.to_string(),
            reason: reason.into(),
        }
    }
}
