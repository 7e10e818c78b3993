//! Pylon Persistence - Database entities and persistence layer
//!
//! This crate provides:
//! - SeaORM entity definitions
//! - Persistence trait abstractions for unified storage
//! - Domain model types for persistence operations
//! - An external database backend and an in-memory backend

pub mod entity;
pub mod memory;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export entity prelude
pub use entity::prelude::*;

// Re-export persistence traits
pub use traits::{GatewayPersistence, PersistenceService, PluginPersistence, ReleasePersistence};

// Re-export backends
pub use memory::MemoryPersistService;
pub use sql::ExternalDbPersistService;

// Re-export model types
pub use model::{
    BackendConfig, BackendConfigInfo, BackendHost, BackendTimeout, GatewayInfo, JwtKeyInfo,
    NewPluginBinding, PluginBindingBatch, PluginBindingInfo, PluginBindingUpdate,
    PluginConfigInfo, ProtoInfo, PublishEventInfo, ReleaseHistoryInfo, ReleaseInfo,
    ResourceVersionInfo, SslCertificateInfo, StageInfo, StorageMode,
};
