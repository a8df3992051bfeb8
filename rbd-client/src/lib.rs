pub mod error;
pub mod fake;
pub mod traits;
pub mod types;

pub use error::BackendError;
pub use traits::{RbdClient, TaskManager};
pub use types::{
    CloneOptions, GroupSpec, ImageFeature, ImageSpec, ImageStat, MirrorImageState, MirrorStatus, ParentInfo,
};
