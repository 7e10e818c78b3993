//! Plugin binding resolution, synchronization and the binding service

pub mod resolver;
pub mod service;
pub mod synchronizer;

pub use resolver::{BindingPlan, ScopeBinding, resolve_bindings};
pub use service::PluginBindingService;
pub use synchronizer::{DesiredPlugin, PluginSynchronizer};
