//! In-memory `RbdClient`/`TaskManager` used by the volume engine's test
//! suite so the state machine, depth governor and journal are exercised
//! without a live Ceph cluster (SPEC_FULL.md Component K).

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use crate::{
    error::BackendError,
    types::{CloneOptions, GroupSpec, ImageFeature, ImageSpec, ImageStat, MirrorStatus, ParentInfo},
    RbdClient, TaskManager,
};

#[derive(Debug, Clone)]
struct FakeImage {
    size: u64,
    features: Vec<ImageFeature>,
    parent: Option<ParentInfo>,
    snapshots: HashSet<String>,
    watchers: usize,
    metadata: HashMap<String, String>,
    id: String,
    in_trash: bool,
    mirror: Option<MirrorStatus>,
}

#[derive(Default)]
struct FakeGroup {
    members: HashSet<ImageSpec>,
    snapshots: Vec<String>,
}

/// Deterministic in-memory stand-in for a Ceph cluster's RBD pool.
#[derive(Default)]
pub struct FakeRbdClient {
    images: Mutex<HashMap<ImageSpec, FakeImage>>,
    groups: Mutex<HashMap<GroupSpec, FakeGroup>>,
    pool_ids: Mutex<HashMap<String, i64>>,
    next_id: Mutex<u64>,
    pub flatten_calls: Mutex<Vec<ImageSpec>>,
}

impl FakeRbdClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let mut n = self.next_id.lock().unwrap();
        *n += 1;
        format!("image-id-{}", n)
    }

    /// Test seam: mark an image as a secondary replica in a given mirror
    /// state, to exercise spec.md §4.D step 3.
    pub fn set_mirror_status(&self, image: &ImageSpec, status: MirrorStatus) {
        let mut images = self.images.lock().unwrap();
        if let Some(img) = images.get_mut(image) {
            img.mirror = Some(status);
        }
    }

    pub fn set_watchers(&self, image: &ImageSpec, watchers: usize) {
        let mut images = self.images.lock().unwrap();
        if let Some(img) = images.get_mut(image) {
            img.watchers = watchers;
        }
    }

    pub fn exists(&self, image: &ImageSpec) -> bool {
        self.images.lock().unwrap().contains_key(image)
    }
}

#[async_trait]
impl RbdClient for FakeRbdClient {
    async fn get_pool_id(&self, pool: &str) -> Result<i64, BackendError> {
        let mut pool_ids = self.pool_ids.lock().unwrap();
        let next = pool_ids.len() as i64 + 1;
        Ok(*pool_ids.entry(pool.to_string()).or_insert(next))
    }

    async fn get_pool_name(&self, pool_id: i64) -> Result<String, BackendError> {
        let pool_ids = self.pool_ids.lock().unwrap();
        pool_ids
            .iter()
            .find(|(_, id)| **id == pool_id)
            .map(|(name, _)| name.clone())
            .ok_or(BackendError::Other { details: format!("no pool registered with id {}", pool_id) })
    }

    async fn create(&self, image: &ImageSpec, size: u64, features: &[ImageFeature]) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        if images.contains_key(image) {
            return Err(BackendError::ImageExists { pool: image.pool.clone(), name: image.name.clone() });
        }
        let id = self.next_id();
        drop(images);
        let id = id;
        let mut images = self.images.lock().unwrap();
        images.insert(
            image.clone(),
            FakeImage {
                size,
                features: features.to_vec(),
                parent: None,
                snapshots: HashSet::new(),
                watchers: 0,
                metadata: HashMap::new(),
                id,
                in_trash: false,
                mirror: None,
            },
        );
        Ok(())
    }

    async fn clone(
        &self,
        parent: &ImageSpec,
        parent_snap: &str,
        child: &ImageSpec,
        options: &CloneOptions,
    ) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        let parent_image = images
            .get(parent)
            .ok_or_else(|| BackendError::ImageNotFound { pool: parent.pool.clone(), name: parent.name.clone() })?;
        if !parent_image.snapshots.contains(parent_snap) {
            return Err(BackendError::Other {
                details: format!("snapshot '{}' not found on '{}'", parent_snap, parent.name),
            });
        }
        if images.contains_key(child) {
            return Err(BackendError::ImageExists { pool: child.pool.clone(), name: child.name.clone() });
        }
        let id = {
            let mut n = self.next_id.lock().unwrap();
            *n += 1;
            format!("image-id-{}", n)
        };
        let size = parent_image.size;
        images.insert(
            child.clone(),
            FakeImage {
                size,
                features: options.feature_set.clone(),
                parent: Some(ParentInfo { image: parent.clone(), in_trash: false }),
                snapshots: HashSet::new(),
                watchers: 0,
                metadata: HashMap::new(),
                id,
                in_trash: false,
                mirror: None,
            },
        );
        Ok(())
    }

    async fn open(&self, image: &ImageSpec) -> Result<(), BackendError> {
        let images = self.images.lock().unwrap();
        if images.contains_key(image) {
            Ok(())
        } else {
            Err(BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })
        }
    }

    async fn stat(&self, image: &ImageSpec) -> Result<ImageStat, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(ImageStat { size: img.size, features: img.features.clone() })
    }

    async fn get_id(&self, image: &ImageSpec) -> Result<String, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(img.id.clone())
    }

    async fn get_features(&self, image: &ImageSpec) -> Result<Vec<ImageFeature>, BackendError> {
        Ok(self.stat(image).await?.features)
    }

    async fn list_snapshots(&self, image: &ImageSpec) -> Result<Vec<String>, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(img.snapshots.iter().cloned().collect())
    }

    async fn list_watchers(&self, image: &ImageSpec) -> Result<usize, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(img.watchers)
    }

    async fn trash_move(&self, image: &ImageSpec) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        let img = images
            .get_mut(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        img.in_trash = true;
        Ok(())
    }

    async fn trash_remove(&self, image: &ImageSpec) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        images.remove(image);
        Ok(())
    }

    async fn list_trash(&self, pool: &str) -> Result<Vec<ImageSpec>, BackendError> {
        let images = self.images.lock().unwrap();
        Ok(images
            .iter()
            .filter(|(spec, img)| spec.pool == pool && img.in_trash)
            .map(|(spec, _)| spec.clone())
            .collect())
    }

    async fn flatten(&self, image: &ImageSpec) -> Result<(), BackendError> {
        self.flatten_calls.lock().unwrap().push(image.clone());
        let mut images = self.images.lock().unwrap();
        let img = images
            .get_mut(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        img.parent = None;
        Ok(())
    }

    async fn resize(&self, image: &ImageSpec, size: u64) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        let img = images
            .get_mut(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        img.size = size;
        Ok(())
    }

    async fn get_metadata(&self, image: &ImageSpec, key: &str) -> Result<Option<String>, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(img.metadata.get(key).cloned())
    }

    async fn set_metadata(&self, image: &ImageSpec, key: &str, value: &str) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        let img = images
            .get_mut(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        img.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_parent(&self, image: &ImageSpec) -> Result<Option<ParentInfo>, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(img.parent.clone())
    }

    async fn create_snapshot(&self, image: &ImageSpec, name: &str) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        let img = images
            .get_mut(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        img.snapshots.insert(name.to_string());
        Ok(())
    }

    async fn remove_snapshot(&self, image: &ImageSpec, name: &str) -> Result<(), BackendError> {
        let mut images = self.images.lock().unwrap();
        if let Some(img) = images.get_mut(image) {
            img.snapshots.remove(name);
        }
        Ok(())
    }

    async fn get_snapshot(&self, image: &ImageSpec, name: &str) -> Result<bool, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(img.snapshots.contains(name))
    }

    async fn group_create(&self, group: &GroupSpec) -> Result<(), BackendError> {
        self.groups.lock().unwrap().entry(group.clone()).or_default();
        Ok(())
    }

    async fn group_remove(&self, group: &GroupSpec) -> Result<(), BackendError> {
        self.groups.lock().unwrap().remove(group);
        Ok(())
    }

    async fn group_image_add(&self, group: &GroupSpec, image: &ImageSpec) -> Result<(), BackendError> {
        let mut groups = self.groups.lock().unwrap();
        let g = groups.entry(group.clone()).or_default();
        g.members.insert(image.clone());
        Ok(())
    }

    async fn group_image_remove(&self, group: &GroupSpec, image: &ImageSpec) -> Result<(), BackendError> {
        if let Some(g) = self.groups.lock().unwrap().get_mut(group) {
            g.members.remove(image);
        }
        Ok(())
    }

    async fn group_snapshot_create(&self, group: &GroupSpec, snap_name: &str) -> Result<(), BackendError> {
        let members: Vec<ImageSpec> = {
            let mut groups = self.groups.lock().unwrap();
            let g = groups
                .get_mut(group)
                .ok_or_else(|| BackendError::Other { details: format!("group '{}' not found", group.name) })?;
            g.snapshots.push(snap_name.to_string());
            g.members.iter().cloned().collect()
        };
        for member in members {
            self.create_snapshot(&member, snap_name).await?;
        }
        Ok(())
    }

    async fn group_snapshot_list(&self, group: &GroupSpec) -> Result<Vec<String>, BackendError> {
        let groups = self.groups.lock().unwrap();
        let g = groups
            .get(group)
            .ok_or_else(|| BackendError::Other { details: format!("group '{}' not found", group.name) })?;
        Ok(g.snapshots.clone())
    }

    async fn get_mirror_image_info(&self, image: &ImageSpec) -> Result<Option<MirrorStatus>, BackendError> {
        let images = self.images.lock().unwrap();
        let img = images
            .get(image)
            .ok_or_else(|| BackendError::ImageNotFound { pool: image.pool.clone(), name: image.name.clone() })?;
        Ok(img.mirror)
    }

    async fn mirror_promote(&self, _image: &ImageSpec, _force: bool) -> Result<(), BackendError> {
        Ok(())
    }

    async fn mirror_demote(&self, _image: &ImageSpec) -> Result<(), BackendError> {
        Ok(())
    }

    async fn mirror_resync(&self, _image: &ImageSpec) -> Result<(), BackendError> {
        Ok(())
    }
}

/// In-memory `TaskManager` that just calls straight through to the
/// `FakeRbdClient`'s synchronous `flatten`/`trash_remove` — sufficient to
/// exercise the depth governor's scheduling decisions without a real async
/// task runner on the other end.
pub struct FakeTaskManager {
    client: std::sync::Arc<FakeRbdClient>,
    pub available: bool,
}

impl FakeTaskManager {
    pub fn new(client: std::sync::Arc<FakeRbdClient>) -> Self {
        Self { client, available: true }
    }

    pub fn unavailable(client: std::sync::Arc<FakeRbdClient>) -> Self {
        Self { client, available: false }
    }
}

#[async_trait]
impl TaskManager for FakeTaskManager {
    fn available(&self) -> bool {
        self.available
    }

    async fn schedule_flatten(&self, image: &ImageSpec) -> Result<(), BackendError> {
        self.client.flatten(image).await
    }

    async fn schedule_trash_remove(&self, image: &ImageSpec) -> Result<(), BackendError> {
        self.client.trash_remove(image).await
    }
}
