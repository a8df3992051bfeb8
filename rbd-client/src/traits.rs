use async_trait::async_trait;

use crate::{
    error::BackendError,
    types::{CloneOptions, GroupSpec, ImageFeature, ImageSpec, ImageStat, MirrorStatus, ParentInfo},
};

/// Image and snapshot CRUD on a Ceph cluster, exactly the surface named in
/// spec.md §6 "Consumed from RBD client". The rest of this workspace only
/// ever talks to a `dyn RbdClient`; an actual librbd/rados binding is
/// explicitly out of scope (spec.md §1).
///
/// Grounded on the teacher's `ClientOps` trait
/// (`control-plane/agents/core/src/core/wrapper.rs`), which plays the same
/// role for the mayastor gRPC data-plane: a narrow async_trait boundary
/// that the service layer calls and that tests replace with a fake.
#[async_trait]
pub trait RbdClient: Send + Sync {
    /// Numeric pool identity as seen by the cluster, used by the identity
    /// codec to compose `volume_id`/`snapshot_id` tokens (spec.md §4.B).
    async fn get_pool_id(&self, pool: &str) -> Result<i64, BackendError>;

    /// Inverse of `get_pool_id`, used to resolve the pool a decoded
    /// identity token addresses before the journal can be queried.
    async fn get_pool_name(&self, pool_id: i64) -> Result<String, BackendError>;

    async fn create(
        &self,
        image: &ImageSpec,
        size: u64,
        features: &[ImageFeature],
    ) -> Result<(), BackendError>;

    async fn clone(
        &self,
        parent: &ImageSpec,
        parent_snap: &str,
        child: &ImageSpec,
        options: &CloneOptions,
    ) -> Result<(), BackendError>;

    async fn open(&self, image: &ImageSpec) -> Result<(), BackendError>;

    async fn stat(&self, image: &ImageSpec) -> Result<ImageStat, BackendError>;

    async fn get_id(&self, image: &ImageSpec) -> Result<String, BackendError>;

    async fn get_features(&self, image: &ImageSpec) -> Result<Vec<ImageFeature>, BackendError>;

    async fn list_snapshots(&self, image: &ImageSpec) -> Result<Vec<String>, BackendError>;

    async fn list_watchers(&self, image: &ImageSpec) -> Result<usize, BackendError>;

    async fn trash_move(&self, image: &ImageSpec) -> Result<(), BackendError>;

    async fn trash_remove(&self, image: &ImageSpec) -> Result<(), BackendError>;

    /// Images currently sitting in `pool`'s trash namespace, used by
    /// `flatten_temporary_cloned_images` (spec.md §4.E.4) to find former
    /// temporary clones that are holding a source snapshot open.
    async fn list_trash(&self, pool: &str) -> Result<Vec<ImageSpec>, BackendError>;

    async fn flatten(&self, image: &ImageSpec) -> Result<(), BackendError>;

    async fn resize(&self, image: &ImageSpec, size: u64) -> Result<(), BackendError>;

    async fn get_metadata(&self, image: &ImageSpec, key: &str) -> Result<Option<String>, BackendError>;

    async fn set_metadata(&self, image: &ImageSpec, key: &str, value: &str) -> Result<(), BackendError>;

    async fn get_parent(&self, image: &ImageSpec) -> Result<Option<ParentInfo>, BackendError>;

    async fn create_snapshot(&self, image: &ImageSpec, name: &str) -> Result<(), BackendError>;

    async fn remove_snapshot(&self, image: &ImageSpec, name: &str) -> Result<(), BackendError>;

    async fn get_snapshot(&self, image: &ImageSpec, name: &str) -> Result<bool, BackendError>;

    async fn group_create(&self, group: &GroupSpec) -> Result<(), BackendError>;

    async fn group_remove(&self, group: &GroupSpec) -> Result<(), BackendError>;

    async fn group_image_add(&self, group: &GroupSpec, image: &ImageSpec) -> Result<(), BackendError>;

    async fn group_image_remove(&self, group: &GroupSpec, image: &ImageSpec) -> Result<(), BackendError>;

    async fn group_snapshot_create(&self, group: &GroupSpec, snap_name: &str) -> Result<(), BackendError>;

    async fn group_snapshot_list(&self, group: &GroupSpec) -> Result<Vec<String>, BackendError>;

    async fn get_mirror_image_info(&self, image: &ImageSpec) -> Result<Option<MirrorStatus>, BackendError>;

    async fn mirror_promote(&self, image: &ImageSpec, force: bool) -> Result<(), BackendError>;

    async fn mirror_demote(&self, image: &ImageSpec) -> Result<(), BackendError>;

    async fn mirror_resync(&self, image: &ImageSpec) -> Result<(), BackendError>;
}

/// Asynchronous long-running-operation scheduler (spec.md §6 "Task-manager":
/// asynchronous trash-remove and flatten). Older clusters do not expose
/// one; the clone-depth governor (spec.md §4.E.3) falls back to a
/// synchronous flatten through `RbdClient::flatten` when `available()` is
/// `false`.
#[async_trait]
pub trait TaskManager: Send + Sync {
    fn available(&self) -> bool;

    async fn schedule_flatten(&self, image: &ImageSpec) -> Result<(), BackendError>;

    async fn schedule_trash_remove(&self, image: &ImageSpec) -> Result<(), BackendError>;
}
