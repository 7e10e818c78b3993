//! Pylon Registry - the shared key-value store read by the data plane
//!
//! This crate provides:
//! - The `RegistryStore` abstraction with etcd and in-memory backends
//! - Canonical key layout for one gateway+stage
//! - Reconciliation of a gateway+stage prefix to a desired resource set

pub mod etcd;
pub mod key;
pub mod memory;
pub mod registry;
pub mod store;

pub use etcd::{EtcdConfig, EtcdRegistryStore};
pub use key::{RegistryKeyPrefix, ResourceKind};
pub use memory::MemoryRegistryStore;
pub use registry::{FailedResource, Registry, RegistryResource, StoredResource, SyncOutcome};
pub use store::RegistryStore;
