//! SeaORM entity definitions

pub mod prelude;

pub mod backend;
pub mod backend_config;
pub mod gateway;
pub mod gateway_auth_config;
pub mod jwt_key;
pub mod plugin_binding;
pub mod plugin_config;
pub mod plugin_type;
pub mod proto;
pub mod publish_event;
pub mod release;
pub mod release_history;
pub mod resource_version;
pub mod ssl_certificate;
pub mod stage;
