use common::VolumeError;
use rbd_client::{BackendError, CloneOptions, ImageFeature, ImageSpec, RbdClient, TaskManager};

use crate::depth::maybe_schedule_flatten;
use common::DepthLimits;

/// Next action `checkCloneImage` picks from the observable state of the
/// temporary clone `T` and its parent `V` (spec.md §4.E.1 "Recovery on
/// resume"). The spec's two bullets collapse `T` existing with or without
/// `snap(T, Vʹ.image_name)` into one "step 3 pending" case; this engine
/// distinguishes them because they need different RBD calls to finish
/// (S7 exercises the no-snapshot-yet sub-case).
enum RecoveryAction {
    FinishStep3FromSnapshot,
    RunStep3Fresh,
    RestartFromStep2,
    NoPriorState,
}

async fn image_exists(rbd: &dyn RbdClient, image: &ImageSpec) -> Result<bool, VolumeError> {
    match rbd.stat(image).await {
        Ok(_) => Ok(true),
        Err(BackendError::ImageNotFound { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn snapshot_exists(rbd: &dyn RbdClient, image: &ImageSpec, name: &str) -> Result<bool, VolumeError> {
    match rbd.get_snapshot(image, name).await {
        Ok(present) => Ok(present),
        Err(BackendError::ImageNotFound { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn check_clone_image(
    rbd: &dyn RbdClient,
    parent: &ImageSpec,
    temp: &ImageSpec,
    child: &ImageSpec,
) -> Result<RecoveryAction, VolumeError> {
    if image_exists(rbd, temp).await? {
        if snapshot_exists(rbd, temp, &child.name).await? {
            Ok(RecoveryAction::FinishStep3FromSnapshot)
        } else {
            Ok(RecoveryAction::RunStep3Fresh)
        }
    } else if snapshot_exists(rbd, parent, &temp.name).await? {
        Ok(RecoveryAction::RestartFromStep2)
    } else {
        Ok(RecoveryAction::NoPriorState)
    }
}

/// spec.md §4.E.1 steps 1-2: mint the temporary clone `T` from `V` via an
/// intermediate snapshot named after `T`.
async fn create_temp_clone(rbd: &dyn RbdClient, parent: &ImageSpec, temp: &ImageSpec) -> Result<(), VolumeError> {
    rbd.create_snapshot(parent, &temp.name).await?;
    let options = CloneOptions {
        feature_set: vec![ImageFeature::Layering, ImageFeature::DeepFlatten],
        ..Default::default()
    };
    rbd.clone(parent, &temp.name, temp, &options).await?;
    rbd.remove_snapshot(parent, &temp.name).await?;
    Ok(())
}

/// spec.md §4.E.1 step 3: clone the final image `Vʹ` out of `T` via a
/// fresh intermediate snapshot named after `Vʹ`. Also reused by
/// `Engine::create_volume`'s snapshot-source materialisation (spec.md
/// §4.D phase 6), since restoring from a CSI snapshot is the same
/// "snapshot, clone, delete snapshot" shape against the snapshot's own
/// backend image instead of a temporary clone.
pub(crate) async fn clone_final_from_temp(
    rbd: &dyn RbdClient,
    temp: &ImageSpec,
    child: &ImageSpec,
    child_features: &[ImageFeature],
) -> Result<(), VolumeError> {
    rbd.create_snapshot(temp, &child.name).await?;
    finish_step3_from_snapshot(rbd, temp, child, child_features).await
}

async fn finish_step3_from_snapshot(
    rbd: &dyn RbdClient,
    temp: &ImageSpec,
    child: &ImageSpec,
    child_features: &[ImageFeature],
) -> Result<(), VolumeError> {
    let options = CloneOptions { feature_set: child_features.to_vec(), ..Default::default() };
    rbd.clone(temp, &child.name, child, &options).await?;
    rbd.remove_snapshot(temp, &child.name).await?;
    Ok(())
}

/// Drives the full two-stage clone choreography to completion from
/// whatever state a prior, possibly interrupted, attempt left behind.
pub async fn two_stage_clone(
    rbd: &dyn RbdClient,
    task_manager: &dyn TaskManager,
    limits: &DepthLimits,
    parent: &ImageSpec,
    child: &ImageSpec,
    child_features: &[ImageFeature],
) -> Result<(), VolumeError> {
    let temp = child.temp_clone();

    match check_clone_image(rbd, parent, &temp, child).await? {
        RecoveryAction::FinishStep3FromSnapshot => {
            finish_step3_from_snapshot(rbd, &temp, child, child_features).await?;
        }
        RecoveryAction::RunStep3Fresh => {
            clone_final_from_temp(rbd, &temp, child, child_features).await?;
        }
        RecoveryAction::RestartFromStep2 => {
            rbd.remove_snapshot(parent, &temp.name).await?;
            create_temp_clone(rbd, parent, &temp).await?;
            clone_final_from_temp(rbd, &temp, child, child_features).await?;
        }
        RecoveryAction::NoPriorState => {
            create_temp_clone(rbd, parent, &temp).await?;
            clone_final_from_temp(rbd, &temp, child, child_features).await?;
        }
    }

    maybe_schedule_flatten(rbd, task_manager, limits, &temp, false).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbd_client::fake::{FakeRbdClient, FakeTaskManager};
    use std::sync::Arc;

    fn image(name: &str) -> ImageSpec {
        ImageSpec::new("rbd", None, name)
    }

    fn limits() -> DepthLimits {
        DepthLimits { hard_limit: 8, soft_limit: 4 }
    }

    #[tokio::test]
    async fn fresh_clone_produces_final_image_and_schedules_temp_flatten() {
        let client = Arc::new(FakeRbdClient::new());
        client.create(&image("v3"), 1 << 30, &[]).await.unwrap();
        let tasks = FakeTaskManager::new(client.clone());

        two_stage_clone(client.as_ref(), &tasks, &limits(), &image("v3"), &image("v4"), &[ImageFeature::Layering])
            .await
            .unwrap();

        assert!(client.exists(&image("v4")));
        assert!(client.exists(&image("v4-temp")));
    }

    #[tokio::test]
    async fn recovery_after_crash_between_step2_and_step3_finishes_the_clone() {
        let client = Arc::new(FakeRbdClient::new());
        client.create(&image("v"), 1 << 30, &[]).await.unwrap();
        let tasks = FakeTaskManager::new(client.clone());

        create_temp_clone(client.as_ref(), &image("v"), &image("vprime-temp")).await.unwrap();
        assert!(client.exists(&image("vprime-temp")));

        two_stage_clone(client.as_ref(), &tasks, &limits(), &image("v"), &image("vprime"), &[]).await.unwrap();
        assert!(client.exists(&image("vprime")));
    }

    #[tokio::test]
    async fn recovery_with_pending_step3_snapshot_finishes_without_recreating_it() {
        let client = Arc::new(FakeRbdClient::new());
        client.create(&image("v"), 1 << 30, &[]).await.unwrap();
        let tasks = FakeTaskManager::new(client.clone());

        create_temp_clone(client.as_ref(), &image("v"), &image("vprime-temp")).await.unwrap();
        client.create_snapshot(&image("vprime-temp"), "vprime").await.unwrap();

        two_stage_clone(client.as_ref(), &tasks, &limits(), &image("v"), &image("vprime"), &[]).await.unwrap();
        assert!(client.exists(&image("vprime")));
    }

    #[tokio::test]
    async fn recovery_between_2a_and_2b_deletes_stray_snapshot_and_restarts() {
        let client = Arc::new(FakeRbdClient::new());
        client.create(&image("v"), 1 << 30, &[]).await.unwrap();
        let tasks = FakeTaskManager::new(client.clone());

        client.create_snapshot(&image("v"), "vprime-temp").await.unwrap();

        two_stage_clone(client.as_ref(), &tasks, &limits(), &image("v"), &image("vprime"), &[]).await.unwrap();
        assert!(client.exists(&image("vprime")));
        assert!(!client.get_snapshot(&image("v"), "vprime-temp").await.unwrap());
    }
}
