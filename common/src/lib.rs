//! Shared error taxonomy, configuration and observability scaffolding for
//! the volume lifecycle control plane, grounded on
//! `control-plane/agents/common` in the teacher.

pub mod config;
pub mod context;
pub mod errors;
pub mod logging;
mod resource;

pub use config::{ClusterConfig, ConfigError, ControllerConfig, Credentials, DepthLimits, SnapshotLimits};
pub use context::RequestContext;
pub use errors::VolumeError;
pub use resource::ResourceKind;
