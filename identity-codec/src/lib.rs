//! Encodes and decodes the opaque CSI volume/snapshot identity token
//! (spec.md §4.B, §6) and recognises the legacy migration-id grammar.
//!
//! Grounded on the teacher's preference for hand-rolled, fixed-width
//! parsing of wire tokens over a regex dependency (e.g.
//! `control-plane/agents/common/src/wrapper/v0/msg_translation.rs`'s direct
//! field-by-field translation between RPC and bus types).

use common::{ResourceKind, VolumeError};
use snafu::Snafu;
use uuid::Uuid;

const VERSION_WIDTH: usize = 16;
const POOL_ID_WIDTH: usize = 16;
const UUID_WIDTH: usize = 36;
/// `version(16 hex)-pool_id(16 hex)-cluster_id(36)-object_uuid(36)`.
const CANONICAL_LEN: usize =
    VERSION_WIDTH + 1 + POOL_ID_WIDTH + 1 + UUID_WIDTH + 1 + UUID_WIDTH;

const MIGRATION_MONS_PREFIX: &str = "mig_mons-";
const MIGRATION_IMAGE_INFIX: &str = "_image-";

/// The decoded form of a canonical (non-migration) CSI identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub version: u16,
    pub pool_id: i64,
    pub cluster_id: String,
    pub object_uuid: Uuid,
}

impl Identity {
    pub fn new(version: u16, pool_id: i64, cluster_id: impl Into<String>, object_uuid: Uuid) -> Self {
        Self { version, pool_id, cluster_id: cluster_id.into(), object_uuid }
    }

    /// Encode as `<hex16 version>-<hex16 pool-id>-<cluster-id uuid>-<object uuid>`
    /// (spec.md §6).
    pub fn encode(&self) -> String {
        format!(
            "{:0width$x}-{:0width$x}-{}-{}",
            self.version,
            self.pool_id as u64,
            self.cluster_id,
            self.object_uuid,
            width = VERSION_WIDTH,
        )
    }

    pub fn decode(token: &str) -> Result<Self, IdentityError> {
        if token.len() != CANONICAL_LEN {
            return Err(IdentityError::InvalidVolId { token: token.to_string() });
        }
        let version_s = &token[0..VERSION_WIDTH];
        let rest = &token[VERSION_WIDTH..];
        let rest = strip_sep(rest, token)?;
        let pool_s = &rest[0..POOL_ID_WIDTH];
        let rest = &rest[POOL_ID_WIDTH..];
        let rest = strip_sep(rest, token)?;
        let cluster_s = &rest[0..UUID_WIDTH];
        let rest = &rest[UUID_WIDTH..];
        let rest = strip_sep(rest, token)?;
        let uuid_s = rest;
        if uuid_s.len() != UUID_WIDTH {
            return Err(IdentityError::InvalidVolId { token: token.to_string() });
        }

        let version = u16::from_str_radix(version_s, 16)
            .map_err(|_| IdentityError::InvalidVolId { token: token.to_string() })?;
        let pool_id = u64::from_str_radix(pool_s, 16)
            .map_err(|_| IdentityError::InvalidVolId { token: token.to_string() })? as i64;
        let object_uuid = Uuid::parse_str(uuid_s)
            .map_err(|_| IdentityError::InvalidVolId { token: token.to_string() })?;
        // validate cluster_id parses as a uuid-shaped token too, per spec.md §4.B.
        if Uuid::parse_str(cluster_s).is_err() {
            return Err(IdentityError::InvalidVolId { token: token.to_string() });
        }

        Ok(Self { version, pool_id, cluster_id: cluster_s.to_string(), object_uuid })
    }
}

fn strip_sep<'a>(s: &'a str, token: &str) -> Result<&'a str, IdentityError> {
    s.strip_prefix('-').ok_or_else(|| IdentityError::InvalidVolId { token: token.to_string() })
}

/// A legacy (pre-journal) import identity: encodes backend coordinates
/// directly instead of through an OMAP row (spec.md §4.B, §6, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationIdentity {
    pub cluster_hash: String,
    pub image_name: String,
    pub pool_name: String,
}

/// `true` iff `token` matches the migration-id grammar
/// (`mig_mons-<hash>_image-<uuid>_<hex(pool_name)>`).
pub fn is_migration(token: &str) -> bool {
    token.starts_with(MIGRATION_MONS_PREFIX) && token.contains(MIGRATION_IMAGE_INFIX)
}

/// Parse a migration id into its backend coordinates.
pub fn parse_migration(token: &str) -> Result<MigrationIdentity, IdentityError> {
    let invalid = || IdentityError::InvalidMigrationId { token: token.to_string() };

    let rest = token.strip_prefix(MIGRATION_MONS_PREFIX).ok_or_else(invalid)?;
    let (cluster_hash, rest) = rest.split_once(MIGRATION_IMAGE_INFIX).ok_or_else(invalid)?;
    let (image_and_uuid, pool_hex) = rest.rsplit_once('_').ok_or_else(invalid)?;
    let image_name = image_and_uuid.to_string();
    let pool_bytes = hex::decode(pool_hex).map_err(|_| invalid())?;
    let pool_name = String::from_utf8(pool_bytes).map_err(|_| invalid())?;

    if cluster_hash.is_empty() || image_name.is_empty() || pool_name.is_empty() {
        return Err(invalid());
    }

    Ok(MigrationIdentity { cluster_hash: cluster_hash.to_string(), image_name, pool_name })
}

/// Build the `mig_mons-...` token for a given monitor list, image name and
/// pool name (used by tests and by any repair path that needs to recreate
/// one deterministically).
pub fn encode_migration(monitors: &[String], image_name: &str, pool_name: &str) -> String {
    let joined = monitors.join(",");
    let digest = md5::compute(joined.as_bytes());
    let cluster_hash = format!("{:x}", digest);
    let pool_hex = hex::encode(pool_name.as_bytes());
    format!("{}{}{}{}_{}", MIGRATION_MONS_PREFIX, cluster_hash, MIGRATION_IMAGE_INFIX, image_name, pool_hex)
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IdentityError {
    #[snafu(display("invalid volume/snapshot id '{}'", token))]
    InvalidVolId { token: String },
    #[snafu(display("invalid migration id '{}'", token))]
    InvalidMigrationId { token: String },
}

impl From<IdentityError> for VolumeError {
    fn from(source: IdentityError) -> Self {
        VolumeError::InvalidArgument { details: source.to_string() }
    }
}

/// Convenience used by callers that need a `ResourceKind` alongside an
/// identity-decode failure (e.g. the volume engine reporting which object
/// a malformed id was supposed to name).
pub fn decode_or_not_found(token: &str, resource: ResourceKind) -> Result<Identity, VolumeError> {
    Identity::decode(token).map_err(|_| VolumeError::not_found(resource, token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Identity {
        Identity::new(
            2,
            3,
            "2bc0d879-8a10-4d3e-82f1-cfc78f1f8baa",
            Uuid::parse_str("9c6a9f6a-0b9a-4d3f-9b0e-52e6b9ecf111").unwrap(),
        )
    }

    #[test]
    fn round_trips_a_valid_identity() {
        let id = sample();
        let token = id.encode();
        assert_eq!(Identity::decode(&token).unwrap(), id);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Identity::decode("not-a-valid-id").is_err());
        assert!(Identity::decode(&sample().encode()[1..]).is_err());
    }

    #[test]
    fn migration_id_round_trips() {
        let monitors = vec!["10.0.0.1:6789".to_string(), "10.0.0.2:6789".to_string()];
        let token = encode_migration(&monitors, "csi-vol-abcd", "replicapool");
        assert!(is_migration(&token));
        let parsed = parse_migration(&token).unwrap();
        assert_eq!(parsed.image_name, "csi-vol-abcd");
        assert_eq!(parsed.pool_name, "replicapool");
    }

    #[test]
    fn non_migration_tokens_are_rejected_by_is_migration() {
        assert!(!is_migration(&sample().encode()));
    }
}
