/// Well-known RADOS object names for a pool's journal, per spec.md §6
/// "Persistent state layout". One instance-id-scoped index object per
/// kind, plus one per-uuid attribute object.
pub fn volumes_index(instance_id: &str) -> String {
    format!("csi.volumes.{}", instance_id)
}

pub fn volume_attrs(uuid: &str) -> String {
    format!("csi.volume.{}", uuid)
}

pub fn snapshots_index(instance_id: &str) -> String {
    format!("csi.snaps.{}", instance_id)
}

pub fn snapshot_attrs(uuid: &str) -> String {
    format!("csi.snap.{}", uuid)
}

pub fn groups_index(instance_id: &str) -> String {
    format!("csi.groups.{}", instance_id)
}

pub fn group_attrs(uuid: &str) -> String {
    format!("csi.group.{}", uuid)
}

pub fn group_members(uuid: &str) -> String {
    format!("csi.group.{}.members", uuid)
}

pub(crate) const KEY_VOLNAME: &str = "csi.volname";
pub(crate) const KEY_IMAGENAME: &str = "csi.imagename";
pub(crate) const KEY_IMAGEID: &str = "csi.imageid";
pub(crate) const KEY_REQUESTNAME: &str = "csi.requestname";
pub(crate) const KEY_JOURNALPOOL: &str = "csi.journalpool";
pub(crate) const KEY_KMS: &str = "csi.kms";
pub(crate) const KEY_ENCRYPTION_TYPE: &str = "csi.encryption.type";
pub(crate) const KEY_OWNER: &str = "csi.owner";
pub(crate) const KEY_SOURCE_IMAGENAME: &str = "csi.source.imagename";
pub(crate) const KEY_PARENT_UUID: &str = "csi.parent.uuid";
pub(crate) const KEY_GROUPNAME: &str = "csi.groupname";
pub(crate) const KEY_CREATIONTIME: &str = "csi.creationtime";
pub(crate) const KEY_SNAPNAME: &str = "csi.snapname";

pub(crate) const ALL_VOLUME_ATTR_KEYS: &[&str] = &[
    KEY_VOLNAME,
    KEY_IMAGENAME,
    KEY_IMAGEID,
    KEY_REQUESTNAME,
    KEY_JOURNALPOOL,
    KEY_KMS,
    KEY_ENCRYPTION_TYPE,
    KEY_OWNER,
    KEY_SOURCE_IMAGENAME,
    KEY_PARENT_UUID,
    KEY_CREATIONTIME,
    KEY_SNAPNAME,
];

/// Attributes of a journal row, mirroring the `csi.*` keys of spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAttributes {
    pub uuid: String,
    pub image_name: String,
    pub image_id: Option<String>,
    pub request_name: String,
    pub journal_pool: String,
    pub kms_id: Option<String>,
    pub encryption_type: Option<String>,
    pub owner: Option<String>,
    pub source_image_name: Option<String>,
    pub parent_uuid: Option<String>,
    pub created_at: String,
    /// RBD-level snapshot name backing a `JournalKind::Snapshot` row; unset
    /// on volume rows.
    pub snap_name: Option<String>,
}

/// Parameters a caller supplies to `reserve_name`; compared against a
/// pre-existing row to decide `NameConflict` vs idempotent replay.
#[derive(Debug, Clone, Default)]
pub struct ReservationRequest {
    pub name_prefix: Option<String>,
    /// Pool the backend image itself lives in, stamped into `csi.journalpool`
    /// so a row resolved from a decoded identity token (which only names the
    /// pool the journal row lives in) can locate the image when the two
    /// pools differ (spec.md §6).
    pub image_pool: String,
    pub kms_id: Option<String>,
    pub encryption_type: Option<String>,
    pub owner: Option<String>,
    pub source_image_name: Option<String>,
    pub parent_uuid: Option<String>,
}

impl ReservationRequest {
    /// Attributes that must match bit-for-bit between two reservation
    /// attempts under the same `request_name`, else the second is a
    /// `NameConflict` (spec.md §4.A).
    fn matches(&self, existing: &VolumeAttributes) -> bool {
        self.kms_id == existing.kms_id
            && self.encryption_type == existing.encryption_type
            && self.source_image_name == existing.source_image_name
            && self.parent_uuid == existing.parent_uuid
    }
}

pub(crate) fn reservation_matches(req: &ReservationRequest, existing: &VolumeAttributes) -> bool {
    req.matches(existing)
}

/// A transient group row (spec.md §4.F): name/creation-time plus the
/// member volume ids currently added to the ephemeral RBD group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupAttributes {
    pub group_uuid: String,
    pub name: Option<String>,
    pub created_at: Option<String>,
    pub member_volume_ids: Vec<String>,
}
