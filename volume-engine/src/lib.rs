//! The volume-lifecycle state machine: everything behind the CSI
//! `Controller` RPCs once the gRPC layer has decoded its request (spec.md
//! §4.D-§4.F). `Engine` owns one journal, one lock registry and one RBD
//! backend per Ceph cluster; `csi-controller` is the only crate that talks
//! gRPC, and it does so by calling straight into this one.

mod clone;
mod depth;
mod engine;
mod group;
mod snapshot;
mod types;
mod volume;

pub use engine::Engine;
pub use types::{ContentSource, EncryptionConfig, GroupSnapshot, Snapshot, Volume, VolumeGroup, VolumeSpec};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{DepthLimits, SnapshotLimits, VolumeError};
    use omap_journal::{JournalKind, MemKvStore, ReservationRequest};
    use rbd_client::fake::{FakeRbdClient, FakeTaskManager};
    use rbd_client::{ImageFeature, ImageSpec};

    use super::*;

    fn engine(client: Arc<FakeRbdClient>) -> Engine {
        let tasks = Arc::new(FakeTaskManager::new(client.clone()));
        Engine::new(
            "cluster-1",
            "instance-1",
            Arc::new(MemKvStore::new()),
            client,
            tasks,
            DepthLimits { hard_limit: 8, soft_limit: 4 },
            SnapshotLimits { hard_snapshot_limit: 450, min_snapshots_to_flatten: 50 },
        )
    }

    fn spec(request_name: &str, size_bytes: u64) -> VolumeSpec {
        VolumeSpec {
            request_name: request_name.to_string(),
            size_bytes,
            cluster_id: "cluster-1".to_string(),
            pool: "rbd".to_string(),
            journal_pool: "rbd".to_string(),
            data_pool: None,
            rados_namespace: None,
            name_prefix: Some("csi-vol-".to_string()),
            feature_set: vec![ImageFeature::Layering],
            mounter: None,
            encryption: None,
            owner: None,
            content_source: ContentSource::None,
        }
    }

    /// S1: a bare `CreateVolume` reserves a journal row, creates the
    /// backend image at the requested size and returns an opaque,
    /// re-decodable `volume_id`.
    #[tokio::test]
    async fn s1_create_volume_provisions_a_fresh_image() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let volume = engine.create_volume(spec("pvc-1", 10 << 20)).await.unwrap();

        assert_eq!(volume.actual_size, 10 << 20);
        let resolved = engine.resolve_volume(&volume.volume_id).await.unwrap();
        assert_eq!(resolved.image_name, volume.image_name);
    }

    /// S1 continued: calling `CreateVolume` again with the same request
    /// name is idempotent and returns the same volume.
    #[tokio::test]
    async fn create_volume_is_idempotent_on_request_name() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let first = engine.create_volume(spec("pvc-1", 10 << 20)).await.unwrap();
        let second = engine.create_volume(spec("pvc-1", 10 << 20)).await.unwrap();

        assert_eq!(first.volume_id, second.volume_id);
        assert_eq!(first.image_name, second.image_name);
    }

    /// S2: deleting a volume is idempotent — calling it twice, or against
    /// a volume that was never fully created, is not an error.
    #[tokio::test]
    async fn s2_delete_volume_is_idempotent() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let volume = engine.create_volume(spec("pvc-1", 10 << 20)).await.unwrap();

        engine.delete_volume(&volume.volume_id).await.unwrap();
        engine.delete_volume(&volume.volume_id).await.unwrap();

        let err = engine.resolve_volume(&volume.volume_id).await.unwrap_err();
        assert!(matches!(err, VolumeError::NotFound { .. }));
    }

    /// S3: `ControllerExpandVolume` grows the backend image and is a no-op
    /// when the requested size is already satisfied.
    #[tokio::test]
    async fn s3_expand_volume_grows_then_is_idempotent() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let volume = engine.create_volume(spec("pvc-1", 10 << 20)).await.unwrap();

        let grown = engine.expand_volume(&volume.volume_id, 20 << 20).await.unwrap();
        assert_eq!(grown, 20 << 20);

        let unchanged = engine.expand_volume(&volume.volume_id, 15 << 20).await.unwrap();
        assert_eq!(unchanged, 20 << 20);
    }

    /// S4: cloning a volume from another volume produces a new, independent
    /// image bound to its own journal row, and its clone depth is 1.
    #[tokio::test]
    async fn s4_clone_from_volume_produces_independent_child() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let parent = engine.create_volume(spec("pvc-parent", 10 << 20)).await.unwrap();

        let mut child_spec = spec("pvc-child", 10 << 20);
        child_spec.content_source = ContentSource::Volume(parent.volume_id.clone());
        let child = engine.create_volume(child_spec).await.unwrap();

        assert_ne!(child.image_name, parent.image_name);
        assert_eq!(child.parent_name.as_deref(), Some(parent.image_name.as_str()));
    }

    /// S5: a `CreateSnapshot`/restore round trip — snapshotting a volume
    /// then creating a new volume from that snapshot.
    #[tokio::test]
    async fn s5_create_snapshot_then_restore_from_it() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let volume = engine.create_volume(spec("pvc-1", 10 << 20)).await.unwrap();

        let snap = engine.create_snapshot("snap-1", &volume.volume_id).await.unwrap();
        assert!(snap.ready_to_use);
        assert_eq!(snap.source_volume_id, volume.volume_id);

        let mut restore_spec = spec("pvc-restored", 10 << 20);
        restore_spec.content_source = ContentSource::Snapshot(snap.snapshot_id.clone());
        let restored = engine.create_volume(restore_spec).await.unwrap();
        assert_eq!(restored.actual_size, 10 << 20);

        engine.delete_snapshot(&snap.snapshot_id).await.unwrap();
        engine.delete_snapshot(&snap.snapshot_id).await.unwrap();
    }

    /// S6: `CreateSnapshot` against a volume lacking the layering feature
    /// is rejected outright rather than producing a broken clone.
    #[tokio::test]
    async fn s6_snapshot_requires_layering_feature() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let mut no_layering = spec("pvc-1", 10 << 20);
        no_layering.feature_set = vec![];
        let volume = engine.create_volume(no_layering).await.unwrap();

        let err = engine.create_snapshot("snap-1", &volume.volume_id).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidArgument { .. }));
    }

    /// S7: a group snapshot over two member volumes produces one snapshot
    /// per member sharing the same RBD snapshot name, and the group row
    /// survives so `GetVolumeGroupSnapshot` can still answer after the
    /// ephemeral RBD group is torn down.
    #[tokio::test]
    async fn s7_group_snapshot_covers_every_member_and_is_retrievable() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let v1 = engine.create_volume(spec("pvc-1", 10 << 20)).await.unwrap();
        let v2 = engine.create_volume(spec("pvc-2", 10 << 20)).await.unwrap();

        let group_snap = engine
            .create_volume_group_snapshot("rbd", None, &[v1.volume_id.clone(), v2.volume_id.clone()])
            .await
            .unwrap();
        assert_eq!(group_snap.member_snapshots.len(), 2);
        let names: Vec<&str> = group_snap.member_snapshots.iter().map(|s| s.rbd_snap_name.as_str()).collect();
        assert_eq!(names[0], names[1]);

        let fetched = engine.get_volume_group_snapshot(None, &group_snap.group_snapshot_id).await.unwrap();
        assert_eq!(fetched.member_snapshots.len(), 2);

        engine.delete_volume_group_snapshot(None, &group_snap.group_snapshot_id).await.unwrap();
        let err = engine.get_volume_group_snapshot(None, &group_snap.group_snapshot_id).await.unwrap_err();
        assert!(matches!(err, VolumeError::NotFound { .. }));
    }

    /// spec.md §4.D Repair: a journal row left over from a process that
    /// crashed after `reserve_name` but before `store_image_id` still has
    /// its backend image; `CreateVolume` must repair the missing
    /// `image_id` in place rather than minting a new volume.
    #[tokio::test]
    async fn repair_stamps_missing_image_id_without_minting_a_new_volume() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let loc = engine.journal_loc("rbd", None);

        let req = ReservationRequest { image_pool: "rbd".to_string(), ..Default::default() };
        let (_uuid, image_name) =
            engine.journal.reserve_name(&loc, JournalKind::Volume, "pvc-precrash", &req).await.unwrap();
        let image = ImageSpec::new("rbd".to_string(), None, image_name.clone());
        engine.rbd.create(&image, 10 << 20, &[ImageFeature::Layering]).await.unwrap();

        let volume = engine.create_volume(spec("pvc-precrash", 10 << 20)).await.unwrap();

        assert_eq!(volume.image_name, image_name);
        assert!(volume.image_id.is_some());
    }

    /// spec.md §4.D Repair: a snapshot-source restore resumed after a crash
    /// must re-copy the encryption config onto the target image, not just
    /// repair `image_id`.
    #[tokio::test]
    async fn repair_recopies_encryption_config_for_snapshot_source_restore() {
        let engine = engine(Arc::new(FakeRbdClient::new()));
        let source = engine.create_volume(spec("pvc-source", 10 << 20)).await.unwrap();
        let snap = engine.create_snapshot("snap-1", &source.volume_id).await.unwrap();

        let encryption = EncryptionConfig { kms_id: "kms-1".to_string(), encryption_type: "luks".to_string() };

        let loc = engine.journal_loc("rbd", None);
        let req = ReservationRequest {
            image_pool: "rbd".to_string(),
            kms_id: Some(encryption.kms_id.clone()),
            encryption_type: Some(encryption.encryption_type.clone()),
            source_image_name: Some(snap.image_name.clone()),
            ..Default::default()
        };
        let (_uuid, image_name) =
            engine.journal.reserve_name(&loc, JournalKind::Volume, "pvc-restored", &req).await.unwrap();
        let image = ImageSpec::new("rbd".to_string(), None, image_name.clone());
        engine.rbd.create(&image, 10 << 20, &[ImageFeature::Layering]).await.unwrap();

        let mut restore_spec = spec("pvc-restored", 10 << 20);
        restore_spec.content_source = ContentSource::Snapshot(snap.snapshot_id.clone());
        restore_spec.encryption = Some(encryption.clone());

        let restored = engine.create_volume(restore_spec).await.unwrap();
        assert_eq!(restored.image_name, image_name);

        assert_eq!(engine.rbd.get_metadata(&image, "csi.kms").await.unwrap(), Some(encryption.kms_id));
        assert_eq!(engine.rbd.get_metadata(&image, "csi.encryption.type").await.unwrap(), Some(encryption.encryption_type));
    }
}
