use common::{DepthLimits, VolumeError};
use rbd_client::{ImageSpec, RbdClient, TaskManager};

/// spec.md §4.E.3 clone-chain depth governor. Walks `parent_name` links,
/// stopping at a trashed parent (it cannot grow the chain further).
pub async fn get_clone_depth(rbd: &dyn RbdClient, image: &ImageSpec) -> Result<usize, VolumeError> {
    let mut depth = 0usize;
    let mut current = image.clone();
    loop {
        match rbd.get_parent(&current).await? {
            Some(parent) => {
                if parent.in_trash {
                    break;
                }
                depth += 1;
                current = parent.image;
            }
            None => break,
        }
    }
    Ok(depth)
}

/// Reduces `limits` by the allowance the state machine applies before
/// cloning/restoring (spec.md §4.E.3): 2 for a volume source (the
/// two-stage clone itself adds two levels of depth), 1 for a snapshot
/// source.
pub fn effective_limits(limits: &DepthLimits, allowance: usize) -> DepthLimits {
    DepthLimits {
        hard_limit: limits.hard_limit.saturating_sub(allowance),
        soft_limit: limits.soft_limit.saturating_sub(allowance),
    }
}

/// Schedules or performs a flatten of `image` according to the governor's
/// policy, and fails the caller when the hard limit is breached.
pub async fn maybe_schedule_flatten(
    rbd: &dyn RbdClient,
    task_manager: &dyn TaskManager,
    limits: &DepthLimits,
    image: &ImageSpec,
    force: bool,
) -> Result<(), VolumeError> {
    let depth = get_clone_depth(rbd, image).await?;
    let should_flatten = force || depth >= limits.soft_limit;

    if should_flatten {
        if task_manager.available() {
            task_manager.schedule_flatten(image).await?;
        } else if force || depth >= limits.hard_limit {
            rbd.flatten(image).await?;
        }
    }

    if depth >= limits.hard_limit {
        return Err(VolumeError::FlattenInProgress { image_name: image.name.clone() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DepthLimits;
    use rbd_client::fake::{FakeRbdClient, FakeTaskManager};
    use rbd_client::CloneOptions;
    use std::sync::Arc;

    fn image(name: &str) -> ImageSpec {
        ImageSpec::new("rbd", None, name)
    }

    async fn chain(client: &FakeRbdClient, names: &[&str]) {
        client.create(&image(names[0]), 1024, &[]).await.unwrap();
        for pair in names.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            client.create_snapshot(&image(parent), "snap").await.unwrap();
            client.clone(&image(parent), "snap", &image(child), &CloneOptions::default()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn depth_counts_non_trashed_ancestors() {
        let client = FakeRbdClient::new();
        chain(&client, &["v0", "v1", "v2", "v3"]).await;
        let depth = get_clone_depth(&client, &image("v3")).await.unwrap();
        assert_eq!(depth, 3);
    }

    #[tokio::test]
    async fn hard_limit_breach_returns_flatten_in_progress() {
        let client = Arc::new(FakeRbdClient::new());
        chain(&client, &["v0", "v1", "v2", "v3"]).await;
        let tasks = FakeTaskManager::new(client.clone());
        let limits = DepthLimits { hard_limit: 3, soft_limit: 2 };

        let err = maybe_schedule_flatten(client.as_ref(), &tasks, &limits, &image("v3"), false).await.unwrap_err();
        assert!(matches!(err, VolumeError::FlattenInProgress { .. }));
    }

    #[tokio::test]
    async fn below_soft_limit_does_not_schedule() {
        let client = Arc::new(FakeRbdClient::new());
        chain(&client, &["v0", "v1"]).await;
        let tasks = FakeTaskManager::new(client.clone());
        let limits = DepthLimits { hard_limit: 8, soft_limit: 4 };

        maybe_schedule_flatten(client.as_ref(), &tasks, &limits, &image("v1"), false).await.unwrap();
        assert!(client.flatten_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_task_manager_falls_back_to_sync_flatten_only_past_hard_limit() {
        let client = Arc::new(FakeRbdClient::new());
        chain(&client, &["v0", "v1", "v2", "v3"]).await;
        let tasks = FakeTaskManager::unavailable(client.clone());
        let limits = DepthLimits { hard_limit: 3, soft_limit: 2 };

        let err = maybe_schedule_flatten(client.as_ref(), &tasks, &limits, &image("v3"), false).await.unwrap_err();
        assert!(matches!(err, VolumeError::FlattenInProgress { .. }));
        assert!(!client.flatten_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn effective_limits_reduces_by_allowance() {
        let limits = DepthLimits { hard_limit: 8, soft_limit: 4 };
        let reduced = effective_limits(&limits, 2);
        assert_eq!(reduced.hard_limit, 6);
        assert_eq!(reduced.soft_limit, 2);
    }
}
