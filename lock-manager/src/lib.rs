//! Process-wide named locks serialising concurrent CSI operations on the
//! same logical object (spec.md §4.C).

mod named;
mod operation;

pub use named::{NamedLockGuard, NamedLocks};
pub use operation::{OperationGuard, OperationKind, OperationLock};

use common::VolumeError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LockError {
    #[snafu(display("lock for '{}' is already held", key))]
    AlreadyExists { key: String },
    #[snafu(display("operation '{}' already in progress on '{}'", kind, id))]
    OperationAlreadyExists { kind: String, id: String },
}

impl From<LockError> for VolumeError {
    fn from(source: LockError) -> Self {
        match source {
            LockError::AlreadyExists { key } => {
                VolumeError::OperationAlreadyExists { kind: "lock".to_string(), id: key }
            }
            LockError::OperationAlreadyExists { kind, id } => {
                VolumeError::OperationAlreadyExists { kind, id }
            }
        }
    }
}

/// Every named-lock registry a CSI controller needs: volume locks, snapshot
/// locks and the per-operation-kind lock (spec.md §4.C). Bundled together
/// so a state machine only has to thread one value through its
/// constructors, the way the teacher threads a single `Registry` through
/// `volume::service::Service`/`pool::service::Service`
/// (`control-plane/agents/core/src/{volume,pool}/service.rs`).
#[derive(Clone, Default)]
pub struct LockManager {
    pub volume_locks: NamedLocks,
    pub snapshot_locks: NamedLocks,
    pub operation_lock: OperationLock,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }
}
