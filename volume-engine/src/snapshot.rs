//! spec.md §4.E.2/§4.E.4: `CreateSnapshot`, `DeleteSnapshot` and the
//! snapshot-count governor that runs ahead of every new snapshot.

use uuid::Uuid;

use common::{ResourceKind, VolumeError};
use identity_codec::decode_or_not_found;
use lock_manager::OperationKind;
use omap_journal::{JournalKind, ReservationRequest};
use rbd_client::{BackendError, ImageFeature, ImageSpec};

use crate::clone;
use crate::depth::maybe_schedule_flatten;
use crate::engine::Engine;
use crate::types::Snapshot;

impl Engine {
    /// spec.md §4.E.4: keeps the snapshot count on `source` from growing
    /// past the backend's own per-image ceiling before another one is
    /// added. Force-flattens every known former temporary clone and
    /// reports `ResourceExhausted` once the hard limit is already past;
    /// otherwise flattens only the excess above the soft limit.
    async fn flatten_temporary_cloned_images(&self, source: &ImageSpec) -> Result<(), VolumeError> {
        let count = self.rbd.list_snapshots(source).await?.len();
        if count <= self.snapshot_limits.min_snapshots_to_flatten {
            return Ok(());
        }

        let former_temp_clones: Vec<ImageSpec> =
            self.rbd.list_trash(&source.pool).await?.into_iter().filter(|i| i.is_temp_clone()).collect();

        let force = count > self.snapshot_limits.hard_snapshot_limit;
        let excess = count.saturating_sub(self.snapshot_limits.min_snapshots_to_flatten);
        let to_flatten = if force { former_temp_clones.len() } else { excess.min(former_temp_clones.len()) };

        for image in former_temp_clones.into_iter().take(to_flatten) {
            if self.task_manager.available() {
                self.task_manager.schedule_flatten(&image).await?;
            } else {
                self.rbd.flatten(&image).await?;
            }
        }

        if force {
            return Err(VolumeError::SnapshotLimitExceeded {
                image_name: source.name.clone(),
                count,
                hard_limit: self.snapshot_limits.hard_snapshot_limit,
            });
        }
        Ok(())
    }

    /// Clones `source` into a fresh image via an intermediate snapshot
    /// (the same "snapshot, clone, delete snapshot" shape as the two-stage
    /// clone's step 3), then stamps the persistent CSI-visible snapshot on
    /// that new image (spec.md §4.E.2 step 6).
    async fn materialise_snapshot(&self, source: &ImageSpec, snap_image: &ImageSpec, feature_set: &[ImageFeature]) -> Result<(), VolumeError> {
        clone::clone_final_from_temp(self.rbd.as_ref(), source, snap_image, feature_set).await?;
        self.rbd.create_snapshot(snap_image, &snap_image.name).await?;
        Ok(())
    }

    /// spec.md §4.E.2 `CreateSnapshot`.
    pub async fn create_snapshot(&self, request_name: &str, source_volume_id: &str) -> Result<Snapshot, VolumeError> {
        // Steps 1-2.
        let source = self.resolve_volume(source_volume_id).await?;
        let _volume_guard = self.locks.volume_locks.try_acquire(&source.volume_id)?;
        let _op_guard = self.locks.operation_lock.try_acquire(&source.volume_id, OperationKind::SnapshotCreate)?;

        if !source.feature_set.contains(&ImageFeature::Layering) {
            return Err(VolumeError::invalid_argument(format!(
                "source volume '{}' lacks the layering feature required to snapshot",
                source.volume_id
            )));
        }

        let source_image = ImageSpec::new(source.pool.clone(), source.rados_namespace.clone(), source.image_name.clone());
        let journal_pool = source.journal_pool.clone();
        let loc = self.journal_loc(&journal_pool, source.rados_namespace.as_deref());

        // Step 3 — resume if this name was already reserved.
        if let Some(existing) = self.journal.check_reservation(&loc, JournalKind::Snapshot, request_name).await? {
            let uuid = Uuid::parse_str(&existing.uuid).unwrap_or_default();
            let snapshot_id = self.encode_id(&journal_pool, uuid).await?;
            return self.resolve_snapshot(&snapshot_id).await;
        }

        // Step 4.
        self.flatten_temporary_cloned_images(&source_image).await?;

        // Step 5.
        let req = ReservationRequest {
            name_prefix: Some("csi-snap-".to_string()),
            image_pool: source.pool.clone(),
            kms_id: source.encryption.as_ref().map(|e| e.kms_id.clone()),
            encryption_type: source.encryption.as_ref().map(|e| e.encryption_type.clone()),
            owner: None,
            source_image_name: Some(source.image_name.clone()),
            parent_uuid: Some(source.reserved_id.to_string()),
        };
        let (uuid, image_name) = self.journal.reserve_name(&loc, JournalKind::Snapshot, request_name, &req).await?;
        let snap_image = ImageSpec::new(source.pool.clone(), source.rados_namespace.clone(), image_name.clone());

        // Step 6.
        if let Err(e) = self.materialise_snapshot(&source_image, &snap_image, &source.feature_set).await {
            let _ = self.journal.undo_reservation(&loc, JournalKind::Snapshot, request_name, &uuid.to_string()).await;
            return Err(e);
        }

        let image_id = self.rbd.get_id(&snap_image).await?;
        self.journal.store_image_id(&loc, JournalKind::Snapshot, &uuid.to_string(), &image_id).await?;
        self.journal.store_snap_name(&loc, JournalKind::Snapshot, &uuid.to_string(), &snap_image.name).await?;
        maybe_schedule_flatten(self.rbd.as_ref(), self.task_manager.as_ref(), &self.depth_limits, &snap_image, false).await?;

        // Step 7.
        self.rbd.set_metadata(&snap_image, "csi.requestname", request_name).await?;
        self.rbd.set_metadata(&source_image, "csi.requestname", "").await.ok();

        let snapshot_id = self.encode_id(&journal_pool, uuid).await?;
        Ok(Snapshot {
            request_name: request_name.to_string(),
            snapshot_id,
            source_volume_id: source.volume_id.clone(),
            image_name: snap_image.name.clone(),
            rbd_snap_name: snap_image.name,
            pool: source.pool.clone(),
            journal_pool,
            size: source.actual_size,
            image_id: Some(image_id),
            encryption: source.encryption.clone(),
            ready_to_use: true,
        })
    }

    /// spec.md §4.E.2 `DeleteSnapshot`, the inverse of `create_snapshot`,
    /// idempotent at every step.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), VolumeError> {
        let identity = decode_or_not_found(snapshot_id, ResourceKind::Snapshot)?;
        let _op_guard = self.locks.operation_lock.try_acquire(snapshot_id, OperationKind::Delete)?;

        let journal_pool = match self.rbd.get_pool_name(identity.pool_id).await {
            Ok(pool) => pool,
            Err(_) => return Ok(()),
        };
        let loc = self.journal_loc(&journal_pool, None);
        let uuid = identity.object_uuid.to_string();

        let attrs = match self.journal.get_attributes_by_uuid(&loc, JournalKind::Snapshot, &uuid).await? {
            Some(attrs) => attrs,
            None => return Ok(()),
        };

        let _name_guard = self.locks.snapshot_locks.try_acquire(&attrs.request_name)?;

        let image_pool = if attrs.journal_pool.is_empty() { journal_pool.clone() } else { attrs.journal_pool.clone() };
        let image = ImageSpec::new(image_pool, None, attrs.image_name.clone());

        match self.rbd.trash_move(&image).await {
            Ok(()) | Err(BackendError::ImageNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        match self.rbd.trash_remove(&image).await {
            Ok(()) | Err(BackendError::ImageNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        self.journal.undo_reservation(&loc, JournalKind::Snapshot, &attrs.request_name, &uuid).await?;
        Ok(())
    }
}
