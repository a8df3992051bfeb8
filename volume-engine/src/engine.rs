use std::sync::Arc;

use common::{DepthLimits, SnapshotLimits, VolumeError};
use identity_codec::Identity;
use lock_manager::LockManager;
use omap_journal::{Journal, JournalLocation, KvStore};
use rbd_client::{RbdClient, TaskManager};
use uuid::Uuid;

/// Everything a CSI RPC handler needs to run a volume-lifecycle operation
/// against one Ceph cluster: the journal, the lock registries, the RBD and
/// task-manager collaborators, and the depth/snapshot governor
/// parameters. Built once at startup and handed to the gRPC service layer
/// by reference, the way the teacher threads a single `Registry` into
/// `volume::service::Service::new` (`control-plane/agents/core/src/volume/service.rs`).
pub struct Engine {
    pub cluster_id: String,
    pub locks: LockManager,
    pub journal: Journal,
    pub rbd: Arc<dyn RbdClient>,
    pub task_manager: Arc<dyn TaskManager>,
    pub depth_limits: DepthLimits,
    pub snapshot_limits: SnapshotLimits,
}

impl Engine {
    pub fn new(
        cluster_id: impl Into<String>,
        instance_id: impl Into<String>,
        kv: Arc<dyn KvStore>,
        rbd: Arc<dyn RbdClient>,
        task_manager: Arc<dyn TaskManager>,
        depth_limits: DepthLimits,
        snapshot_limits: SnapshotLimits,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            locks: LockManager::new(),
            journal: Journal::new(kv, instance_id),
            rbd,
            task_manager,
            depth_limits,
            snapshot_limits,
        }
    }

    pub(crate) fn journal_loc<'a>(&self, pool: &'a str, namespace: Option<&'a str>) -> JournalLocation<'a> {
        JournalLocation::new(pool, namespace)
    }

    /// Composes the opaque `volume_id`/`snapshot_id` token for an object
    /// reserved in `pool` (spec.md §4.B, §6).
    pub async fn encode_id(&self, pool: &str, uuid: Uuid) -> Result<String, VolumeError> {
        let pool_id = self.rbd.get_pool_id(pool).await?;
        Ok(Identity::new(2, pool_id, self.cluster_id.clone(), uuid).encode())
    }
}
