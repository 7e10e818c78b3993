//! Persistence traits for the unified storage abstraction layer
//!
//! This module defines the core persistence traits that abstract over the
//! storage backends: external database (MySQL/PostgreSQL) and in-memory.

pub mod gateway;
pub mod plugin;
pub mod release;

pub use gateway::GatewayPersistence;
pub use plugin::PluginPersistence;
pub use release::ReleasePersistence;

use async_trait::async_trait;

use crate::model::StorageMode;

/// Unified persistence service trait
///
/// This is the main interface for all storage operations used by the
/// publish pipeline.
#[async_trait]
pub trait PersistenceService:
    GatewayPersistence + ReleasePersistence + PluginPersistence + Send + Sync
{
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
