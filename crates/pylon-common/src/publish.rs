//! Publish sources, steps and event statuses

/// What requested a publish. The orchestrator applies source-specific
/// policy from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishSource {
    GatewayEnable,
    GatewayDisable,
    VersionPublish,
    StageUpdate,
    StageDisable,
    StageDelete,
    BackendUpdate,
    PluginBind,
    PluginUpdate,
    PluginUnbind,
    CertUpdate,
    RollingUpdate,
    CliSync,
}

impl PublishSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishSource::GatewayEnable => "gateway_enable",
            PublishSource::GatewayDisable => "gateway_disable",
            PublishSource::VersionPublish => "version_publish",
            PublishSource::StageUpdate => "stage_update",
            PublishSource::StageDisable => "stage_disable",
            PublishSource::StageDelete => "stage_delete",
            PublishSource::BackendUpdate => "backend_update",
            PublishSource::PluginBind => "plugin_bind",
            PublishSource::PluginUpdate => "plugin_update",
            PublishSource::PluginUnbind => "plugin_unbind",
            PublishSource::CertUpdate => "cert_update",
            PublishSource::RollingUpdate => "rolling_update",
            PublishSource::CliSync => "cli_sync",
        }
    }

    /// Sources that tear the published configuration down instead of
    /// rolling it forward.
    pub fn is_revoke(&self) -> bool {
        matches!(
            self,
            PublishSource::GatewayDisable | PublishSource::StageDisable | PublishSource::StageDelete
        )
    }

    /// Bulk CLI sync runs silently; every other source records events.
    pub fn emits_events(&self) -> bool {
        *self != PublishSource::CliSync
    }
}

impl std::fmt::Display for PublishSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PublishSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gateway_enable" => Ok(PublishSource::GatewayEnable),
            "gateway_disable" => Ok(PublishSource::GatewayDisable),
            "version_publish" => Ok(PublishSource::VersionPublish),
            "stage_update" => Ok(PublishSource::StageUpdate),
            "stage_disable" => Ok(PublishSource::StageDisable),
            "stage_delete" => Ok(PublishSource::StageDelete),
            "backend_update" => Ok(PublishSource::BackendUpdate),
            "plugin_bind" => Ok(PublishSource::PluginBind),
            "plugin_update" => Ok(PublishSource::PluginUpdate),
            "plugin_unbind" => Ok(PublishSource::PluginUnbind),
            "cert_update" => Ok(PublishSource::CertUpdate),
            "rolling_update" => Ok(PublishSource::RollingUpdate),
            "cli_sync" => Ok(PublishSource::CliSync),
            _ => Err(format!("Invalid publish source: {}", s)),
        }
    }
}

/// Publish pipeline steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PublishStep {
    ValidateConfiguration,
    GenerateTask,
    DistributeConfiguration,
}

impl PublishStep {
    pub const ALL: [PublishStep; 3] = [
        PublishStep::ValidateConfiguration,
        PublishStep::GenerateTask,
        PublishStep::DistributeConfiguration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStep::ValidateConfiguration => "VALIDATE_CONFIGURATION",
            PublishStep::GenerateTask => "GENERATE_TASK",
            PublishStep::DistributeConfiguration => "DISTRIBUTE_CONFIGURATION",
        }
    }
}

impl std::fmt::Display for PublishStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PublishStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALIDATE_CONFIGURATION" => Ok(PublishStep::ValidateConfiguration),
            "GENERATE_TASK" => Ok(PublishStep::GenerateTask),
            "DISTRIBUTE_CONFIGURATION" => Ok(PublishStep::DistributeConfiguration),
            _ => Err(format!("Invalid publish step: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishEventStatus {
    Doing,
    Success,
    Failure,
}

impl PublishEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishEventStatus::Doing => "DOING",
            PublishEventStatus::Success => "SUCCESS",
            PublishEventStatus::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for PublishEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PublishEventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOING" => Ok(PublishEventStatus::Doing),
            "SUCCESS" => Ok(PublishEventStatus::Success),
            "FAILURE" => Ok(PublishEventStatus::Failure),
            _ => Err(format!("Invalid publish event status: {}", s)),
        }
    }
}

/// Model mutations that leave a gateway's published configuration stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Stage,
    PluginBinding,
    PluginConfig,
    AccessStrategy,
    SslCertificate,
    JwtKey,
    MicroGatewayBinding,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Stage => "stage",
            ChangeKind::PluginBinding => "plugin_binding",
            ChangeKind::PluginConfig => "plugin_config",
            ChangeKind::AccessStrategy => "access_strategy",
            ChangeKind::SslCertificate => "ssl_certificate",
            ChangeKind::JwtKey => "jwt_key",
            ChangeKind::MicroGatewayBinding => "micro_gateway_binding",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
