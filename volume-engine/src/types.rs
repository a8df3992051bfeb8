use rbd_client::ImageFeature;
use uuid::Uuid;

/// How a new volume's data is populated (spec.md §4.D inputs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    None,
    Volume(String),
    Snapshot(String),
}

/// Encryption configuration carried alongside a volume or snapshot.
/// Compatibility between a parent's and a child's configuration is
/// enforced at clone/restore preflight (spec.md §4.D phase 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    pub kms_id: String,
    pub encryption_type: String,
}

/// Validated `CreateVolume` configuration, resolved from CSI parameters
/// before any journal or backend call (spec.md §9's "nil-tolerant method
/// chains become explicit two-phase builders": this is phase one, a
/// `VolumeSpec`; [`Volume`] below is phase two, the resolved runtime
/// object bound to a journal row).
#[derive(Debug, Clone)]
pub struct VolumeSpec {
    pub request_name: String,
    pub size_bytes: u64,
    pub cluster_id: String,
    pub pool: String,
    pub journal_pool: String,
    pub data_pool: Option<String>,
    pub rados_namespace: Option<String>,
    pub name_prefix: Option<String>,
    pub feature_set: Vec<ImageFeature>,
    pub mounter: Option<String>,
    pub encryption: Option<EncryptionConfig>,
    pub owner: Option<String>,
    pub content_source: ContentSource,
}

impl VolumeSpec {
    pub fn journal_pool(&self) -> &str {
        if self.journal_pool.is_empty() {
            &self.pool
        } else {
            &self.journal_pool
        }
    }
}

/// A provisioned CSI volume bound to a journal row (spec.md §3 "Volume").
#[derive(Debug, Clone)]
pub struct Volume {
    pub request_name: String,
    pub volume_id: String,
    pub cluster_id: String,
    pub pool: String,
    pub journal_pool: String,
    pub data_pool: Option<String>,
    pub rados_namespace: Option<String>,
    pub image_name: String,
    pub reserved_id: Uuid,
    pub image_id: Option<String>,
    pub requested_size: u64,
    pub actual_size: u64,
    pub feature_set: Vec<ImageFeature>,
    pub encryption: Option<EncryptionConfig>,
    pub owner: Option<String>,
    pub parent_name: Option<String>,
    pub parent_in_trash: bool,
}

/// A CSI snapshot bound to a journal row (spec.md §3 "Snapshot"). The
/// backend image is a clone of the source, carrying exactly one named
/// snapshot whose name equals `rbd_snap_name`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub request_name: String,
    pub snapshot_id: String,
    pub source_volume_id: String,
    pub image_name: String,
    pub rbd_snap_name: String,
    pub pool: String,
    pub journal_pool: String,
    pub size: u64,
    pub image_id: Option<String>,
    pub encryption: Option<EncryptionConfig>,
    pub ready_to_use: bool,
}

/// spec.md §3 "Volume Group": an ephemeral container that exists only for
/// the duration of a group-snapshot operation.
#[derive(Debug, Clone)]
pub struct VolumeGroup {
    pub group_id: String,
    pub name: String,
    pub pool: String,
    pub namespace: Option<String>,
    pub member_volume_ids: Vec<String>,
    pub created_at: String,
}

/// The result of a `CreateVolumeGroupSnapshot` call: the group snapshot's
/// identity plus the per-member snapshot it produced.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group_snapshot_id: String,
    pub group_id: String,
    pub member_snapshots: Vec<Snapshot>,
    pub ready_to_use: bool,
}
