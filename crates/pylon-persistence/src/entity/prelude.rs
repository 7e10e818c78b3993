pub use super::backend::Entity as Backend;
pub use super::backend_config::Entity as BackendConfig;
pub use super::gateway::Entity as Gateway;
pub use super::gateway_auth_config::Entity as GatewayAuthConfig;
pub use super::jwt_key::Entity as JwtKey;
pub use super::plugin_binding::Entity as PluginBinding;
pub use super::plugin_config::Entity as PluginConfig;
pub use super::plugin_type::Entity as PluginType;
pub use super::proto::Entity as Proto;
pub use super::publish_event::Entity as PublishEvent;
pub use super::release::Entity as Release;
pub use super::release_history::Entity as ReleaseHistory;
pub use super::resource_version::Entity as ResourceVersion;
pub use super::ssl_certificate::Entity as SslCertificate;
pub use super::stage::Entity as Stage;
