use crate::ResourceKind;
use snafu::Snafu;
use tonic::Code;

/// Top level error type for the volume lifecycle control plane.
///
/// Every component-local error (`identity_codec::IdentityError`,
/// `omap_journal::JournalError`, `lock_manager::LockError`, ...) converts
/// into this type at its crate boundary (`impl From<ComponentError> for
/// VolumeError`, grounded on the teacher's `impl From<NotEnough> for
/// SvcError` pattern in `control-plane/agents/common/src/errors.rs`) so
/// that a single `impl From<VolumeError> for tonic::Status` gives every CSI
/// RPC a consistent mapping to gRPC codes (spec.md §7).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)]
pub enum VolumeError {
    #[snafu(display("malformed request: {}", details))]
    InvalidArgument { details: String },

    #[snafu(display(
        "encryption config of source is incompatible with the request: {}",
        details
    ))]
    IncompatibleEncryption { details: String },

    #[snafu(display("{} '{}' not found", resource, id))]
    NotFound { resource: ResourceKind, id: String },

    #[snafu(display(
        "journal row for request name '{}' already exists with different attributes",
        request_name
    ))]
    NameConflict { request_name: String },

    #[snafu(display("operation '{}' already in progress on '{}'", kind, id))]
    OperationAlreadyExists { kind: String, id: String },

    #[snafu(display("flatten in progress for image '{}', retry later", image_name))]
    FlattenInProgress { image_name: String },

    #[snafu(display("{} '{}' is in use", resource, id))]
    InUse { resource: ResourceKind, id: String },

    #[snafu(display("mirror image '{}' forbids this operation: {}", image_name, reason))]
    MirrorForbidden { image_name: String, reason: String },

    #[snafu(display(
        "snapshot count on '{}' exceeds the hard limit ({} > {})",
        image_name,
        count,
        hard_limit
    ))]
    SnapshotLimitExceeded {
        image_name: String,
        count: usize,
        hard_limit: usize,
    },

    #[snafu(display("split-brain resync started for '{}'", image_name))]
    ResyncInProgress { image_name: String },

    #[snafu(display("backend error: {}", details))]
    Backend { details: String },

    #[snafu(display("internal error: {}", details))]
    Internal { details: String },
}

impl VolumeError {
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::InvalidArgument { details: details.into() }
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::Internal { details: details.into() }
    }

    pub fn not_found(resource: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound { resource, id: id.into() }
    }

    /// gRPC code this error maps to, per spec.md §7.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument { .. } | Self::IncompatibleEncryption { .. } => {
                Code::InvalidArgument
            }
            Self::NotFound { .. } => Code::NotFound,
            Self::NameConflict { .. } => Code::AlreadyExists,
            Self::OperationAlreadyExists { .. } | Self::FlattenInProgress { .. } => {
                Code::Aborted
            }
            Self::InUse { .. } | Self::MirrorForbidden { .. } => Code::FailedPrecondition,
            Self::SnapshotLimitExceeded { .. } => Code::ResourceExhausted,
            Self::ResyncInProgress { .. } => Code::Unavailable,
            Self::Backend { .. } | Self::Internal { .. } => Code::Internal,
        }
    }
}

impl From<VolumeError> for tonic::Status {
    fn from(error: VolumeError) -> Self {
        let code = error.code();
        tonic::Status::new(code, error.to_string())
    }
}
