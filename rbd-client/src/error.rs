use common::{ResourceKind, VolumeError};
use snafu::Snafu;

/// Errors the backend RBD client (or the KMS/LUKS toolchain it carries
/// encryption through) can return, kept separate from `VolumeError` because
/// this crate describes an external collaborator's interface (spec.md §1)
/// rather than control-plane logic of its own.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    #[snafu(display("image '{}' not found in pool '{}'", name, pool))]
    ImageNotFound { pool: String, name: String },
    #[snafu(display("pool '{}' not found", pool))]
    PoolNotFound { pool: String },
    #[snafu(display("image '{}' already exists in pool '{}'", name, pool))]
    ImageExists { pool: String, name: String },
    #[snafu(display("image '{}' has {} watchers", name, watchers))]
    ImageInUse { name: String, watchers: usize },
    #[snafu(display("flatten of '{}' is still in progress", name))]
    FlattenInProgress { name: String },
    #[snafu(display("backend call failed: {}", details))]
    Other { details: String },
}

impl From<BackendError> for VolumeError {
    fn from(source: BackendError) -> Self {
        match source {
            BackendError::ImageNotFound { name, .. } => {
                VolumeError::not_found(ResourceKind::Image, name)
            }
            BackendError::PoolNotFound { pool } => VolumeError::not_found(ResourceKind::Pool, pool),
            BackendError::ImageExists { name, .. } => {
                VolumeError::NameConflict { request_name: name }
            }
            BackendError::ImageInUse { name, .. } => {
                VolumeError::InUse { resource: ResourceKind::Image, id: name }
            }
            BackendError::FlattenInProgress { name } => VolumeError::FlattenInProgress { image_name: name },
            BackendError::Other { details } => VolumeError::Backend { details },
        }
    }
}
