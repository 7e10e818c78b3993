//! Resource version data and data-plane resource models

pub mod apisix;
pub mod resource;

pub use apisix::{
    ApisixModel, ApisixNode, ApisixProto, ApisixRoute, ApisixService, ApisixSsl, ApisixTimeout,
    ApisixUpstream,
};
pub use resource::{ResourceAuthConfig, ResourceData, ResourcePlugin, ResourceProxy};
