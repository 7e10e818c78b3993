//! Pylon Publish - the publish/reconciliation pipeline
//!
//! This crate turns the declarative state of one gateway+stage into
//! data-plane resources and reconciles them into the registry:
//! - `snapshot`: memoized release data for one publish
//! - `binding`: plugin binding resolution and synchronization
//! - `convertor`: snapshot to route/service/SSL/proto conversion
//! - `transformer`: runs every convertor for one release
//! - `publisher`: eligibility, validate/generate/distribute and revoke
//! - `event`: publish event reporting and status derivation
//! - `queue`: dirty-gateway queue and rolling-update worker

pub mod binding;
pub mod convertor;
pub mod event;
pub mod model;
pub mod publisher;
pub mod queue;
pub mod snapshot;
pub mod transformer;

pub use binding::{BindingPlan, PluginBindingService, PluginSynchronizer, resolve_bindings};
pub use event::{PublishEventReporter, ReleaseStatus, derive_status};
pub use model::{ApisixModel, ResourceData};
pub use publisher::{PublishOutcome, PublishState, Publisher, PublisherConfig, check_eligibility};
pub use queue::{DirtyGatewayQueue, RollingUpdateWorker};
pub use snapshot::ReleaseData;
pub use transformer::ResourceTransformer;
