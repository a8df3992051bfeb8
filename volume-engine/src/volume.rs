//! spec.md §4.D Volume State Machine: `CreateVolume`, `DeleteVolume`,
//! `ControllerExpandVolume`, identity resolution and repair.

use uuid::Uuid;

use common::{DepthLimits, ResourceKind, VolumeError};
use identity_codec::decode_or_not_found;
use lock_manager::OperationKind;
use omap_journal::{JournalKind, JournalLocation, ReservationRequest, VolumeAttributes};
use rbd_client::{BackendError, ImageSpec};

use crate::clone;
use crate::depth::{effective_limits, maybe_schedule_flatten};
use crate::engine::Engine;
use crate::types::{ContentSource, EncryptionConfig, Snapshot, Volume, VolumeSpec};

impl Engine {
    /// Resolves a decoded identity token's pool id back to a pool name
    /// (spec.md §6); the pool is the one the journal row for `resource`
    /// was reserved in.
    async fn resolve_identity(&self, token: &str, resource: ResourceKind) -> Result<(identity_codec::Identity, String), VolumeError> {
        let identity = decode_or_not_found(token, resource)?;
        let pool = self
            .rbd
            .get_pool_name(identity.pool_id)
            .await
            .map_err(|_| VolumeError::not_found(resource, token))?;
        Ok((identity, pool))
    }

    /// Rebuilds the runtime [`Volume`] for an already-reserved journal row
    /// (used by `resolve_volume` and by repair/create-volume resume paths).
    async fn volume_from_attrs(&self, volume_id: &str, journal_pool: &str, attrs: VolumeAttributes) -> Result<Volume, VolumeError> {
        let image_pool = if attrs.journal_pool.is_empty() { journal_pool.to_string() } else { attrs.journal_pool.clone() };
        let image = ImageSpec::new(image_pool.clone(), None, attrs.image_name.clone());
        let stat = self.rbd.stat(&image).await?;
        let parent = self.rbd.get_parent(&image).await?;
        let encryption = match (&attrs.kms_id, &attrs.encryption_type) {
            (Some(kms_id), Some(encryption_type)) => {
                Some(EncryptionConfig { kms_id: kms_id.clone(), encryption_type: encryption_type.clone() })
            }
            _ => None,
        };

        Ok(Volume {
            request_name: attrs.request_name,
            volume_id: volume_id.to_string(),
            cluster_id: self.cluster_id.clone(),
            pool: image_pool,
            journal_pool: journal_pool.to_string(),
            data_pool: None,
            rados_namespace: None,
            image_name: attrs.image_name,
            reserved_id: Uuid::parse_str(&attrs.uuid).unwrap_or_default(),
            image_id: attrs.image_id,
            requested_size: stat.size,
            actual_size: stat.size,
            feature_set: stat.features,
            encryption,
            owner: attrs.owner,
            parent_name: parent.as_ref().map(|p| p.image.name.clone()),
            parent_in_trash: parent.map(|p| p.in_trash).unwrap_or(false),
        })
    }

    /// Rebuilds the runtime [`Snapshot`] for an already-reserved journal
    /// row. The source volume's identity is reconstructed from the stored
    /// `parent_uuid`, assuming it shares the snapshot's image pool (true
    /// for every snapshot this engine creates — spec.md §4.E.2).
    async fn snapshot_from_attrs(&self, snapshot_id: &str, journal_pool: &str, attrs: VolumeAttributes) -> Result<Snapshot, VolumeError> {
        let image_pool = if attrs.journal_pool.is_empty() { journal_pool.to_string() } else { attrs.journal_pool.clone() };
        let image = ImageSpec::new(image_pool.clone(), None, attrs.image_name.clone());
        let stat = self.rbd.stat(&image).await?;

        let source_volume_id = match &attrs.parent_uuid {
            Some(uuid) => {
                let parent_uuid = Uuid::parse_str(uuid)
                    .map_err(|_| VolumeError::internal("malformed parent uuid in snapshot row"))?;
                self.encode_id(&image_pool, parent_uuid).await?
            }
            None => String::new(),
        };

        let encryption = match (&attrs.kms_id, &attrs.encryption_type) {
            (Some(kms_id), Some(encryption_type)) => {
                Some(EncryptionConfig { kms_id: kms_id.clone(), encryption_type: encryption_type.clone() })
            }
            _ => None,
        };

        Ok(Snapshot {
            request_name: attrs.request_name,
            snapshot_id: snapshot_id.to_string(),
            source_volume_id,
            image_name: attrs.image_name,
            rbd_snap_name: attrs.snap_name.unwrap_or_default(),
            pool: image_pool,
            journal_pool: journal_pool.to_string(),
            size: stat.size,
            image_id: attrs.image_id,
            encryption,
            ready_to_use: true,
        })
    }

    /// Decodes `volume_id` and rebuilds the [`Volume`] it names, the way a
    /// `DeleteVolume`/`ControllerExpandVolume`/clone-source resolve step
    /// needs (spec.md §4.D phase 1).
    pub async fn resolve_volume(&self, volume_id: &str) -> Result<Volume, VolumeError> {
        let (identity, journal_pool) = self.resolve_identity(volume_id, ResourceKind::Volume).await?;
        let loc = self.journal_loc(&journal_pool, None);
        let attrs = self
            .journal
            .get_attributes_by_uuid(&loc, JournalKind::Volume, &identity.object_uuid.to_string())
            .await?
            .ok_or_else(|| VolumeError::not_found(ResourceKind::Volume, volume_id))?;
        self.volume_from_attrs(volume_id, &journal_pool, attrs).await
    }

    /// Decodes `snapshot_id` and rebuilds the [`Snapshot`] it names
    /// (spec.md §4.D phase 1, snapshot-source branch).
    pub async fn resolve_snapshot(&self, snapshot_id: &str) -> Result<Snapshot, VolumeError> {
        let (identity, journal_pool) = self.resolve_identity(snapshot_id, ResourceKind::Snapshot).await?;
        let loc = self.journal_loc(&journal_pool, None);
        let attrs = self
            .journal
            .get_attributes_by_uuid(&loc, JournalKind::Snapshot, &identity.object_uuid.to_string())
            .await?
            .ok_or_else(|| VolumeError::not_found(ResourceKind::Snapshot, snapshot_id))?;
        self.snapshot_from_attrs(snapshot_id, &journal_pool, attrs).await
    }

    /// The allowance the depth governor reduces its limits by before a
    /// clone/restore, per source kind (spec.md §4.E.3).
    fn depth_allowance(source: &ContentSource) -> usize {
        match source {
            ContentSource::Volume(_) => 2,
            ContentSource::Snapshot(_) => 1,
            ContentSource::None => 0,
        }
    }

    async fn materialise_volume(
        &self,
        spec: &VolumeSpec,
        child: &ImageSpec,
        limits: &DepthLimits,
        source_volume: &Option<Volume>,
        source_snapshot: &Option<Snapshot>,
    ) -> Result<(), VolumeError> {
        if let Some(parent) = source_volume {
            let parent_image = ImageSpec::new(parent.pool.clone(), None, parent.image_name.clone());
            return clone::two_stage_clone(
                self.rbd.as_ref(),
                self.task_manager.as_ref(),
                limits,
                &parent_image,
                child,
                &spec.feature_set,
            )
            .await;
        }
        if let Some(snapshot) = source_snapshot {
            let source_image = ImageSpec::new(snapshot.pool.clone(), None, snapshot.image_name.clone());
            return clone::clone_final_from_temp(self.rbd.as_ref(), &source_image, child, &spec.feature_set).await;
        }
        self.rbd.create(child, spec.size_bytes, &spec.feature_set).await.map_err(Into::into)
    }

    /// spec.md §4.D phase 7: stamp image id, expand if short, set
    /// metadata, and build the response `Volume`.
    async fn finish_postconditions(
        &self,
        spec: &VolumeSpec,
        loc: &JournalLocation<'_>,
        child: &ImageSpec,
        uuid: Uuid,
    ) -> Result<Volume, VolumeError> {
        let image_id = self.rbd.get_id(child).await?;
        self.journal.store_image_id(loc, JournalKind::Volume, &uuid.to_string(), &image_id).await?;

        let stat = self.rbd.stat(child).await?;
        let mut actual_size = stat.size;
        if actual_size < spec.size_bytes {
            self.rbd.resize(child, spec.size_bytes).await?;
            actual_size = spec.size_bytes;
        }

        if let Some(owner) = &spec.owner {
            self.rbd.set_metadata(child, "owner", owner).await?;
        }
        self.rbd.set_metadata(child, "csi.requestname", &spec.request_name).await?;
        if let Some(encryption) = &spec.encryption {
            self.stamp_encryption_metadata(child, encryption).await?;
        }

        let parent = self.rbd.get_parent(child).await?;
        let volume_id = self.encode_id(spec.journal_pool(), uuid).await?;

        Ok(Volume {
            request_name: spec.request_name.clone(),
            volume_id,
            cluster_id: self.cluster_id.clone(),
            pool: spec.pool.clone(),
            journal_pool: spec.journal_pool().to_string(),
            data_pool: spec.data_pool.clone(),
            rados_namespace: spec.rados_namespace.clone(),
            image_name: child.name.clone(),
            reserved_id: uuid,
            image_id: Some(image_id),
            requested_size: spec.size_bytes,
            actual_size,
            feature_set: spec.feature_set.clone(),
            encryption: spec.encryption.clone(),
            owner: spec.owner.clone(),
            parent_name: parent.as_ref().map(|p| p.image.name.clone()),
            parent_in_trash: parent.map(|p| p.in_trash).unwrap_or(false),
        })
    }

    /// Writes the volume's KMS id and encryption type onto the backend
    /// image's own metadata (spec.md §4.D "copy encryption config"),
    /// alongside the copy already held in the journal row.
    async fn stamp_encryption_metadata(&self, image: &ImageSpec, encryption: &EncryptionConfig) -> Result<(), VolumeError> {
        self.rbd.set_metadata(image, "csi.kms", &encryption.kms_id).await?;
        self.rbd.set_metadata(image, "csi.encryption.type", &encryption.encryption_type).await?;
        Ok(())
    }

    /// spec.md §4.D Repair: the journal row and backend image both exist
    /// but `image_id` is unset — stamp it. For a snapshot-source restore,
    /// also re-run the encryption-config copy against the target image, in
    /// case the process crashed between the journal write and the image
    /// stamp. Never mints a new `volume_id`.
    async fn repair_existing(&self, spec: &VolumeSpec, loc: &JournalLocation<'_>, mut existing: VolumeAttributes) -> Result<Volume, VolumeError> {
        let image_pool = if existing.journal_pool.is_empty() { spec.pool.clone() } else { existing.journal_pool.clone() };
        let image = ImageSpec::new(image_pool, spec.rados_namespace.clone(), existing.image_name.clone());

        if existing.image_id.is_none() {
            let image_id = self.rbd.get_id(&image).await?;
            self.journal.store_image_id(loc, JournalKind::Volume, &existing.uuid, &image_id).await?;
            existing.image_id = Some(image_id);
        }

        if matches!(spec.content_source, ContentSource::Snapshot(_)) {
            if let Some(encryption) = &spec.encryption {
                self.stamp_encryption_metadata(&image, encryption).await?;
            }
        }

        let uuid = Uuid::parse_str(&existing.uuid).unwrap_or_default();
        let volume_id = self.encode_id(spec.journal_pool(), uuid).await?;
        self.volume_from_attrs(&volume_id, spec.journal_pool(), existing).await
    }

    /// spec.md §4.D `CreateVolume`.
    pub async fn create_volume(&self, spec: VolumeSpec) -> Result<Volume, VolumeError> {
        // Phase 1 — resolve content source.
        let (source_volume, source_snapshot) = match &spec.content_source {
            ContentSource::None => (None, None),
            ContentSource::Volume(id) => (Some(self.resolve_volume(id).await?), None),
            ContentSource::Snapshot(id) => (None, Some(self.resolve_snapshot(id).await?)),
        };

        // Phase 2 — locking.
        let _volume_guard = self.locks.volume_locks.try_acquire(&spec.request_name)?;

        let journal_pool = spec.journal_pool().to_string();
        let loc = self.journal_loc(&journal_pool, spec.rados_namespace.as_deref());

        // Phase 3 — existence probe.
        if let Some(existing) = self.journal.check_reservation(&loc, JournalKind::Volume, &spec.request_name).await? {
            let image_pool = if existing.journal_pool.is_empty() { spec.pool.clone() } else { existing.journal_pool.clone() };
            let image = ImageSpec::new(image_pool, spec.rados_namespace.clone(), existing.image_name.clone());

            match self.rbd.open(&image).await {
                Ok(()) => return self.repair_existing(&spec, &loc, existing).await,
                Err(BackendError::ImageNotFound { .. }) => {
                    if let Some(parent) = &source_volume {
                        let uuid = Uuid::parse_str(&existing.uuid).unwrap_or_default();
                        let child = ImageSpec::new(spec.pool.clone(), spec.rados_namespace.clone(), existing.image_name.clone());
                        let limits = effective_limits(&self.depth_limits, Self::depth_allowance(&spec.content_source));
                        let parent_image = ImageSpec::new(parent.pool.clone(), None, parent.image_name.clone());
                        clone::two_stage_clone(
                            self.rbd.as_ref(),
                            self.task_manager.as_ref(),
                            &limits,
                            &parent_image,
                            &child,
                            &spec.feature_set,
                        )
                        .await?;
                        return self.finish_postconditions(&spec, &loc, &child, uuid).await;
                    }
                    self.journal
                        .undo_reservation(&loc, JournalKind::Volume, &spec.request_name, &existing.uuid)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Phase 4 — preflight.
        if let Some(parent) = &source_volume {
            if let (Some(child_enc), Some(parent_enc)) = (&spec.encryption, &parent.encryption) {
                if child_enc != parent_enc {
                    return Err(VolumeError::IncompatibleEncryption {
                        details: format!("source volume '{}' encryption config does not match request", parent.volume_id),
                    });
                }
            }
        }
        if let Some(source) = &source_snapshot {
            if let (Some(child_enc), Some(src_enc)) = (&spec.encryption, &source.encryption) {
                if child_enc != src_enc {
                    return Err(VolumeError::IncompatibleEncryption {
                        details: format!("source snapshot '{}' encryption config does not match request", source.snapshot_id),
                    });
                }
            }
        }

        let limits = effective_limits(&self.depth_limits, Self::depth_allowance(&spec.content_source));
        if let Some(parent) = &source_volume {
            let parent_image = ImageSpec::new(parent.pool.clone(), None, parent.image_name.clone());
            maybe_schedule_flatten(self.rbd.as_ref(), self.task_manager.as_ref(), &limits, &parent_image, false).await?;
        }

        // Phase 5 — reservation.
        let req = ReservationRequest {
            name_prefix: spec.name_prefix.clone(),
            image_pool: spec.pool.clone(),
            kms_id: spec.encryption.as_ref().map(|e| e.kms_id.clone()),
            encryption_type: spec.encryption.as_ref().map(|e| e.encryption_type.clone()),
            owner: spec.owner.clone(),
            source_image_name: source_volume
                .as_ref()
                .map(|v| v.image_name.clone())
                .or_else(|| source_snapshot.as_ref().map(|s| s.image_name.clone())),
            parent_uuid: source_volume.as_ref().map(|v| v.reserved_id.to_string()),
        };
        let (uuid, image_name) = self.journal.reserve_name(&loc, JournalKind::Volume, &spec.request_name, &req).await?;
        let child = ImageSpec::new(spec.pool.clone(), spec.rados_namespace.clone(), image_name);

        // Phase 6 — backend materialisation.
        if let Err(e) = self.materialise_volume(&spec, &child, &limits, &source_volume, &source_snapshot).await {
            let _ = self.journal.undo_reservation(&loc, JournalKind::Volume, &spec.request_name, &uuid.to_string()).await;
            return Err(e);
        }

        // Phase 7 — post-conditions.
        self.finish_postconditions(&spec, &loc, &child, uuid).await
    }

    async fn delete_backend_image(&self, image: &ImageSpec) -> Result<(), VolumeError> {
        match self.rbd.trash_move(image).await {
            Ok(()) => {}
            Err(BackendError::ImageNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        match self.rbd.trash_remove(image).await {
            Ok(()) | Err(BackendError::ImageNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// spec.md §4.D `DeleteVolume`.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), VolumeError> {
        if identity_codec::is_migration(volume_id) {
            let migration = identity_codec::parse_migration(volume_id)?;
            let image = ImageSpec::new(migration.pool_name, None, migration.image_name);
            return self.delete_backend_image(&image).await;
        }

        let identity = decode_or_not_found(volume_id, ResourceKind::Volume)?;
        let _op_guard = self.locks.operation_lock.try_acquire(volume_id, OperationKind::Delete)?;

        let journal_pool = match self.rbd.get_pool_name(identity.pool_id).await {
            Ok(pool) => pool,
            Err(_) => return Ok(()),
        };
        let loc = self.journal_loc(&journal_pool, None);
        let uuid = identity.object_uuid.to_string();

        let attrs = match self.journal.get_attributes_by_uuid(&loc, JournalKind::Volume, &uuid).await? {
            Some(attrs) => attrs,
            None => return Ok(()),
        };

        let _name_guard = self.locks.volume_locks.try_acquire(&attrs.request_name)?;

        let image_pool = if attrs.journal_pool.is_empty() { journal_pool.clone() } else { attrs.journal_pool.clone() };
        let image = ImageSpec::new(image_pool, None, attrs.image_name.clone());

        if let Some(mirror) = self.rbd.get_mirror_image_info(&image).await? {
            if mirror.is_secondary_replaying() {
                self.journal.undo_reservation(&loc, JournalKind::Volume, &attrs.request_name, &uuid).await?;
                return Ok(());
            }
        }

        let watchers = self.rbd.list_watchers(&image).await.unwrap_or(0);
        if watchers > 1 {
            return Err(VolumeError::InUse { resource: ResourceKind::Image, id: attrs.image_name.clone() });
        }

        self.delete_backend_image(&image.temp_clone()).await?;
        self.delete_backend_image(&image).await?;
        self.journal.undo_reservation(&loc, JournalKind::Volume, &attrs.request_name, &uuid).await?;
        Ok(())
    }

    /// spec.md §4.D `ControllerExpandVolume`.
    pub async fn expand_volume(&self, volume_id: &str, requested_size: u64) -> Result<u64, VolumeError> {
        let _op_guard = self.locks.operation_lock.try_acquire(volume_id, OperationKind::Expand)?;
        let volume = self.resolve_volume(volume_id).await?;
        if requested_size <= volume.actual_size {
            return Ok(volume.actual_size);
        }
        let image = ImageSpec::new(volume.pool.clone(), volume.rados_namespace.clone(), volume.image_name.clone());
        self.rbd.resize(&image, requested_size).await?;
        Ok(requested_size)
    }
}
