use std::collections::HashMap;
use std::sync::Arc;

use common::VolumeError;
use snafu::Snafu;
use uuid::Uuid;

use crate::attributes::{
    self, reservation_matches, GroupAttributes, ReservationRequest, VolumeAttributes, ALL_VOLUME_ATTR_KEYS,
    KEY_CREATIONTIME, KEY_ENCRYPTION_TYPE, KEY_GROUPNAME, KEY_IMAGEID, KEY_IMAGENAME, KEY_JOURNALPOOL, KEY_KMS,
    KEY_OWNER, KEY_PARENT_UUID, KEY_REQUESTNAME, KEY_SNAPNAME, KEY_SOURCE_IMAGENAME, KEY_VOLNAME,
};
use crate::kv::{KvError, KvStore};

/// Errors surfaced by journal operations, converging into [`VolumeError`]
/// at this crate's boundary (the same orphan-rule-compliant pattern as
/// `rbd_client::BackendError`).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JournalError {
    #[snafu(display(
        "journal row for request name '{}' already exists with different attributes",
        request_name
    ))]
    NameConflict { request_name: String },
    #[snafu(display("kv store error: {}", details))]
    Kv { details: String },
}

impl From<KvError> for JournalError {
    fn from(source: KvError) -> Self {
        JournalError::Kv { details: source.to_string() }
    }
}

impl From<JournalError> for VolumeError {
    fn from(source: JournalError) -> Self {
        match source {
            JournalError::NameConflict { request_name } => VolumeError::NameConflict { request_name },
            JournalError::Kv { details } => VolumeError::Backend { details },
        }
    }
}

/// Location a journal call addresses: the well-known RADOS objects for
/// this component are scoped by pool and, optionally, namespace.
#[derive(Debug, Clone)]
pub struct JournalLocation<'a> {
    pub pool: &'a str,
    pub namespace: Option<&'a str>,
}

impl<'a> JournalLocation<'a> {
    pub fn new(pool: &'a str, namespace: Option<&'a str>) -> Self {
        Self { pool, namespace }
    }
}

/// Selects which pair of well-known objects (spec.md §6 "Persistent state
/// layout") a row-shaped operation addresses. Volumes and snapshots each
/// get their own name-index object and keep materially the same
/// attribute-key shape, so `Journal`'s row operations are generic over
/// this instead of being duplicated per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalKind {
    Volume,
    Snapshot,
}

impl JournalKind {
    fn index_object(self, instance_id: &str) -> String {
        match self {
            JournalKind::Volume => attributes::volumes_index(instance_id),
            JournalKind::Snapshot => attributes::snapshots_index(instance_id),
        }
    }

    fn attrs_object(self, uuid: &str) -> String {
        match self {
            JournalKind::Volume => attributes::volume_attrs(uuid),
            JournalKind::Snapshot => attributes::snapshot_attrs(uuid),
        }
    }
}

/// Binds CSI request names to backend identities across restarts
/// (spec.md §4.A). Holds only a KV store handle and the configured
/// instance id — no other process-wide state, per spec.md §9's rejection
/// of global journal singletons (`volJournal`, `snapJournal`).
pub struct Journal {
    kv: Arc<dyn KvStore>,
    instance_id: String,
}

impl Journal {
    pub fn new(kv: Arc<dyn KvStore>, instance_id: impl Into<String>) -> Self {
        Self { kv, instance_id: instance_id.into() }
    }

    fn attrs_to_map(request_name: &str, req: &ReservationRequest, image_name: &str, created_at: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(KEY_VOLNAME.to_string(), request_name.to_string());
        m.insert(KEY_IMAGENAME.to_string(), image_name.to_string());
        m.insert(KEY_REQUESTNAME.to_string(), request_name.to_string());
        m.insert(KEY_JOURNALPOOL.to_string(), req.image_pool.clone());
        m.insert(KEY_CREATIONTIME.to_string(), created_at.to_string());
        if let Some(v) = &req.kms_id {
            m.insert(KEY_KMS.to_string(), v.clone());
        }
        if let Some(v) = &req.encryption_type {
            m.insert(KEY_ENCRYPTION_TYPE.to_string(), v.clone());
        }
        if let Some(v) = &req.owner {
            m.insert(KEY_OWNER.to_string(), v.clone());
        }
        if let Some(v) = &req.source_image_name {
            m.insert(KEY_SOURCE_IMAGENAME.to_string(), v.clone());
        }
        if let Some(v) = &req.parent_uuid {
            m.insert(KEY_PARENT_UUID.to_string(), v.clone());
        }
        m
    }

    fn map_to_attrs(uuid: &str, map: &HashMap<String, String>) -> VolumeAttributes {
        VolumeAttributes {
            uuid: uuid.to_string(),
            image_name: map.get(KEY_IMAGENAME).cloned().unwrap_or_default(),
            image_id: map.get(KEY_IMAGEID).filter(|v| !v.is_empty()).cloned(),
            request_name: map.get(KEY_REQUESTNAME).cloned().unwrap_or_default(),
            journal_pool: map.get(KEY_JOURNALPOOL).cloned().unwrap_or_default(),
            kms_id: map.get(KEY_KMS).cloned(),
            encryption_type: map.get(KEY_ENCRYPTION_TYPE).cloned(),
            owner: map.get(KEY_OWNER).filter(|v| !v.is_empty()).cloned(),
            source_image_name: map.get(KEY_SOURCE_IMAGENAME).cloned(),
            parent_uuid: map.get(KEY_PARENT_UUID).cloned(),
            created_at: map.get(KEY_CREATIONTIME).cloned().unwrap_or_default(),
            snap_name: map.get(KEY_SNAPNAME).filter(|v| !v.is_empty()).cloned(),
        }
    }

    async fn lookup_uuid(&self, loc: &JournalLocation<'_>, index_object: &str, request_name: &str) -> Result<Option<String>, JournalError> {
        let keys = vec![request_name.to_string()];
        match self.kv.get_omap(loc.pool, loc.namespace, index_object, &keys).await {
            Ok(map) => Ok(map.get(request_name).cloned()),
            Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// spec.md §4.A `reserve_name`. Idempotent: a second call with
    /// identical attributes returns the same `(uuid, image_name)`.
    pub async fn reserve_name(
        &self,
        loc: &JournalLocation<'_>,
        kind: JournalKind,
        request_name: &str,
        req: &ReservationRequest,
    ) -> Result<(Uuid, String), JournalError> {
        let index_object = kind.index_object(&self.instance_id);

        if let Some(uuid) = self.lookup_uuid(loc, &index_object, request_name).await? {
            let attrs_object = kind.attrs_object(&uuid);
            let keys: Vec<String> = ALL_VOLUME_ATTR_KEYS.iter().map(|s| s.to_string()).collect();
            let map = self.kv.get_omap(loc.pool, loc.namespace, &attrs_object, &keys).await?;
            let existing = Self::map_to_attrs(&uuid, &map);
            if !reservation_matches(req, &existing) {
                return Err(JournalError::NameConflict { request_name: request_name.to_string() });
            }
            return Ok((Uuid::parse_str(&uuid).unwrap_or_default(), existing.image_name));
        }

        let uuid = Uuid::new_v4();
        let prefix = req.name_prefix.as_deref().unwrap_or("csi-vol-");
        let image_name = format!("{}{}", prefix, uuid);
        let created_at = chrono::Utc::now().to_rfc3339();

        let attrs_object = kind.attrs_object(&uuid.to_string());
        let attrs_map = Self::attrs_to_map(request_name, req, &image_name, &created_at);
        self.kv.set_omap(loc.pool, loc.namespace, &attrs_object, attrs_map).await?;

        let mut index_kv = HashMap::new();
        index_kv.insert(request_name.to_string(), uuid.to_string());
        self.kv.set_omap(loc.pool, loc.namespace, &index_object, index_kv).await?;

        Ok((uuid, image_name))
    }

    /// spec.md §4.A `check_reservation`.
    pub async fn check_reservation(
        &self,
        loc: &JournalLocation<'_>,
        kind: JournalKind,
        request_name: &str,
    ) -> Result<Option<VolumeAttributes>, JournalError> {
        let index_object = kind.index_object(&self.instance_id);
        let uuid = match self.lookup_uuid(loc, &index_object, request_name).await? {
            Some(uuid) => uuid,
            None => return Ok(None),
        };
        self.get_attributes_by_uuid(loc, kind, &uuid).await
    }

    /// Direct attribute lookup by uuid, bypassing the name index — used to
    /// resolve a volume/snapshot from an already-decoded identity token
    /// rather than its original `request_name`.
    pub async fn get_attributes_by_uuid(
        &self,
        loc: &JournalLocation<'_>,
        kind: JournalKind,
        uuid: &str,
    ) -> Result<Option<VolumeAttributes>, JournalError> {
        let attrs_object = kind.attrs_object(uuid);
        let keys: Vec<String> = ALL_VOLUME_ATTR_KEYS.iter().map(|s| s.to_string()).collect();
        match self.kv.get_omap(loc.pool, loc.namespace, &attrs_object, &keys).await {
            Ok(map) if map.is_empty() => Ok(None),
            Ok(map) => Ok(Some(Self::map_to_attrs(uuid, &map))),
            Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn store_image_id(&self, loc: &JournalLocation<'_>, kind: JournalKind, uuid: &str, image_id: &str) -> Result<(), JournalError> {
        let attrs_object = kind.attrs_object(uuid);
        let mut kv = HashMap::new();
        kv.insert(KEY_IMAGEID.to_string(), image_id.to_string());
        self.kv.set_omap(loc.pool, loc.namespace, &attrs_object, kv).await?;
        Ok(())
    }

    pub async fn reset_image_id(&self, loc: &JournalLocation<'_>, kind: JournalKind, uuid: &str) -> Result<(), JournalError> {
        let attrs_object = kind.attrs_object(uuid);
        let mut kv = HashMap::new();
        kv.insert(KEY_IMAGEID.to_string(), String::new());
        self.kv.set_omap(loc.pool, loc.namespace, &attrs_object, kv).await?;
        Ok(())
    }

    /// Stamps the RBD-level snapshot name on a `JournalKind::Snapshot` row,
    /// known only after the backend clone/snapshot materialization step
    /// completes (spec.md §4.E.2).
    pub async fn store_snap_name(&self, loc: &JournalLocation<'_>, kind: JournalKind, uuid: &str, snap_name: &str) -> Result<(), JournalError> {
        let attrs_object = kind.attrs_object(uuid);
        let mut kv = HashMap::new();
        kv.insert(KEY_SNAPNAME.to_string(), snap_name.to_string());
        self.kv.set_omap(loc.pool, loc.namespace, &attrs_object, kv).await?;
        Ok(())
    }

    pub async fn store_image_owner(&self, loc: &JournalLocation<'_>, kind: JournalKind, uuid: &str, owner: &str) -> Result<(), JournalError> {
        let attrs_object = kind.attrs_object(uuid);
        let mut kv = HashMap::new();
        kv.insert(KEY_OWNER.to_string(), owner.to_string());
        self.kv.set_omap(loc.pool, loc.namespace, &attrs_object, kv).await?;
        Ok(())
    }

    pub async fn reset_volume_owner(&self, loc: &JournalLocation<'_>, kind: JournalKind, uuid: &str) -> Result<(), JournalError> {
        let attrs_object = kind.attrs_object(uuid);
        let mut kv = HashMap::new();
        kv.insert(KEY_OWNER.to_string(), String::new());
        self.kv.set_omap(loc.pool, loc.namespace, &attrs_object, kv).await?;
        Ok(())
    }

    /// spec.md §4.A `undo_reservation`: remove both directions of the
    /// mapping. Idempotent — tolerates an already-gone row.
    pub async fn undo_reservation(&self, loc: &JournalLocation<'_>, kind: JournalKind, request_name: &str, uuid: &str) -> Result<(), JournalError> {
        let index_object = kind.index_object(&self.instance_id);
        let keys = vec![request_name.to_string()];
        match self.kv.remove_omap_keys(loc.pool, loc.namespace, &index_object, &keys).await {
            Ok(()) | Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let attrs_object = kind.attrs_object(uuid);
        let keys: Vec<String> = ALL_VOLUME_ATTR_KEYS.iter().map(|s| s.to_string()).collect();
        match self.kv.remove_omap_keys(loc.pool, loc.namespace, &attrs_object, &keys).await {
            Ok(()) | Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// spec.md §4.A group-membership map: `add_volumes_mapping`.
    pub async fn add_volumes_mapping(&self, loc: &JournalLocation<'_>, group_uuid: &str, volume_id: &str) -> Result<(), JournalError> {
        let members_object = attributes::group_members(group_uuid);
        let mut kv = HashMap::new();
        kv.insert(volume_id.to_string(), String::new());
        self.kv.set_omap(loc.pool, loc.namespace, &members_object, kv).await?;
        Ok(())
    }

    pub async fn remove_volumes_mapping(&self, loc: &JournalLocation<'_>, group_uuid: &str, volume_id: &str) -> Result<(), JournalError> {
        let members_object = attributes::group_members(group_uuid);
        let keys = vec![volume_id.to_string()];
        match self.kv.remove_omap_keys(loc.pool, loc.namespace, &members_object, &keys).await {
            Ok(()) | Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_group_attributes(&self, loc: &JournalLocation<'_>, group_uuid: &str) -> Result<GroupAttributes, JournalError> {
        let attrs_object = attributes::group_attrs(group_uuid);
        let keys = vec![KEY_GROUPNAME.to_string(), KEY_CREATIONTIME.to_string()];
        let attrs_map = match self.kv.get_omap(loc.pool, loc.namespace, &attrs_object, &keys).await {
            Ok(map) => map,
            Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        let members_object = attributes::group_members(group_uuid);
        let members_map = match self.kv.get_omap(loc.pool, loc.namespace, &members_object, &[]).await {
            Ok(map) => map,
            Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(GroupAttributes {
            group_uuid: group_uuid.to_string(),
            name: attrs_map.get(KEY_GROUPNAME).cloned(),
            created_at: attrs_map.get(KEY_CREATIONTIME).cloned(),
            member_volume_ids: members_map.into_keys().collect(),
        })
    }

    /// Stamps a new group's name/creation time (spec.md §4.F row shape).
    pub async fn create_group(&self, loc: &JournalLocation<'_>, group_uuid: &str, name: &str) -> Result<(), JournalError> {
        let attrs_object = attributes::group_attrs(group_uuid);
        let mut kv = HashMap::new();
        kv.insert(KEY_GROUPNAME.to_string(), name.to_string());
        kv.insert(KEY_CREATIONTIME.to_string(), chrono::Utc::now().to_rfc3339());
        self.kv.set_omap(loc.pool, loc.namespace, &attrs_object, kv).await?;
        Ok(())
    }

    /// Removes a group's attrs row and its full membership list. Idempotent
    /// against an already-gone row (spec.md §4.F "Delete is idempotent
    /// against 'already removed' at both the RBD and journal levels").
    pub async fn delete_group(&self, loc: &JournalLocation<'_>, group_uuid: &str) -> Result<(), JournalError> {
        let attrs_object = attributes::group_attrs(group_uuid);
        let keys = vec![KEY_GROUPNAME.to_string(), KEY_CREATIONTIME.to_string()];
        match self.kv.remove_omap_keys(loc.pool, loc.namespace, &attrs_object, &keys).await {
            Ok(()) | Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let members_object = attributes::group_members(group_uuid);
        let members_map = match self.kv.get_omap(loc.pool, loc.namespace, &members_object, &[]).await {
            Ok(map) => map,
            Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        let member_keys: Vec<String> = members_map.into_keys().collect();
        match self.kv.remove_omap_keys(loc.pool, loc.namespace, &members_object, &member_keys).await {
            Ok(()) | Err(KvError::ObjectNotFound { .. }) | Err(KvError::PoolNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
