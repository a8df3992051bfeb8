use std::fmt;

/// Kind of backend resource an error or log line refers to, attached as
/// structured context the way the teacher attaches `ResourceKind` to
/// `SvcError::GrpcRequestError` (`control-plane/agents/common/src/errors.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ResourceKind {
    Volume,
    Snapshot,
    Image,
    TemporaryClone,
    Pool,
    Cluster,
    Group,
    GroupSnapshot,
    Unknown,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Image => "image",
            Self::TemporaryClone => "temporary clone",
            Self::Pool => "pool",
            Self::Cluster => "cluster",
            Self::Group => "group",
            Self::GroupSnapshot => "group snapshot",
            Self::Unknown => "resource",
        };
        write!(f, "{}", s)
    }
}
