use serde::Deserialize;
use std::{collections::HashMap, path::Path};

/// Per-cluster configuration entry (spec.md §3 "Cluster Config").
///
/// Unlike the teacher's `lazy_static! CONFIG: Mutex<Config>`
/// (`csi/src/config.rs`), this is an explicit value built once at startup
/// and threaded through constructors — the REDESIGN note in spec.md §9
/// calls global singletons out specifically.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub monitors: Vec<String>,
    #[serde(default)]
    pub default_rados_namespace: Option<String>,
    #[serde(default)]
    pub read_affinity_labels: Vec<String>,
    #[serde(default)]
    pub default_kms_id: Option<String>,
}

/// Credentials derived per-request from the CSI request's secret map.
/// Scoped to the request; never persisted or logged.
#[derive(Clone)]
pub struct Credentials {
    pub user_id: String,
    pub key: String,
    pub migration_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("key", &"<redacted>")
            .field("migration_key", &self.migration_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Clone/flatten depth governor parameters (spec.md §4.E.3), configurable
/// with the defaults given in the spec.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DepthLimits {
    #[serde(default = "DepthLimits::default_hard_limit")]
    pub hard_limit: usize,
    #[serde(default = "DepthLimits::default_soft_limit")]
    pub soft_limit: usize,
}

impl DepthLimits {
    const fn default_hard_limit() -> usize {
        8
    }
    const fn default_soft_limit() -> usize {
        4
    }
}

impl Default for DepthLimits {
    fn default() -> Self {
        Self {
            hard_limit: Self::default_hard_limit(),
            soft_limit: Self::default_soft_limit(),
        }
    }
}

/// Snapshot-count thresholds for `flatten_temporary_cloned_images`
/// (spec.md §4.E.4).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SnapshotLimits {
    #[serde(default = "SnapshotLimits::default_hard")]
    pub hard_snapshot_limit: usize,
    #[serde(default = "SnapshotLimits::default_soft")]
    pub min_snapshots_to_flatten: usize,
}

impl SnapshotLimits {
    const fn default_hard() -> usize {
        450
    }
    const fn default_soft() -> usize {
        50
    }
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            hard_snapshot_limit: Self::default_hard(),
            min_snapshots_to_flatten: Self::default_soft(),
        }
    }
}

/// Top-level controller configuration: every cluster this instance serves
/// plus the process-wide tunables. Built once in `main` and handed to the
/// state machine by reference/clone, never read back out of a global.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub instance_id: String,
    pub clusters: Vec<ClusterConfig>,
    #[serde(default)]
    pub depth_limits: DepthLimits,
    #[serde(default)]
    pub snapshot_limits: SnapshotLimits,
}

impl ControllerConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            ConfigError::Read { path: path.as_ref().display().to_string(), source }
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { source })
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    /// Build a lookup map once rather than scanning the vec on every
    /// request; used by long-running services that hold the config for
    /// their whole lifetime.
    pub fn cluster_map(&self) -> HashMap<String, ClusterConfig> {
        self.clusters.iter().cloned().map(|c| (c.cluster_id.clone(), c)).collect()
    }
}

#[derive(Debug, snafu::Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file '{}': {}", path, source))]
    Read { path: String, source: std::io::Error },
    #[snafu(display("failed to parse config file: {}", source))]
    Parse { source: serde_yaml::Error },
}
