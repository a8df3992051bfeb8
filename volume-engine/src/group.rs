//! spec.md §4.F Volume Group & Group Snapshot: an ephemeral RBD group
//! exists only for the duration of one `CreateVolumeGroupSnapshot` call;
//! the journal's group row is what survives it.

use uuid::Uuid;

use common::{ResourceKind, VolumeError};
use rbd_client::{GroupSpec, ImageSpec};

use crate::engine::Engine;
use crate::types::{GroupSnapshot, Snapshot};

/// The externally-visible `group_snapshot_id` carries its pool
/// (`"{pool}@{group_uuid}"`) since, unlike an ordinary volume/snapshot id,
/// it isn't an identity-codec token `Get`/`DeleteVolumeGroupSnapshot` could
/// otherwise decode a pool from.
fn parse_group_snapshot_id(group_snapshot_id: &str) -> Result<(&str, &str), VolumeError> {
    group_snapshot_id
        .split_once('@')
        .ok_or_else(|| VolumeError::not_found(ResourceKind::GroupSnapshot, group_snapshot_id))
}

impl Engine {
    /// spec.md §4.F: (1) create an ephemeral group, (2) add every member
    /// image, (3) snapshot the group atomically, (4) remove the members,
    /// (5) delete the group. The per-member snapshot list is persisted in
    /// the journal's group row so it stays enumerable after the RBD group
    /// itself is gone.
    pub async fn create_volume_group_snapshot(
        &self,
        pool: &str,
        namespace: Option<&str>,
        member_volume_ids: &[String],
    ) -> Result<GroupSnapshot, VolumeError> {
        let mut members = Vec::with_capacity(member_volume_ids.len());
        for volume_id in member_volume_ids {
            members.push(self.resolve_volume(volume_id).await?);
        }

        let group_uuid = Uuid::new_v4().to_string();
        let group_name = format!("csi-vg-{}", group_uuid);
        let snap_name = format!("{}-snap", group_name);

        let loc = self.journal_loc(pool, namespace);
        self.journal.create_group(&loc, &group_uuid, &snap_name).await?;
        for member in &members {
            self.journal.add_volumes_mapping(&loc, &group_uuid, &member.volume_id).await?;
        }

        let group = GroupSpec::new(pool.to_string(), namespace.map(str::to_string), group_name);
        self.rbd.group_create(&group).await?;

        let snapshot_result = self.snapshot_group_members(&group, &members, &snap_name).await;

        for member in &members {
            let image = ImageSpec::new(member.pool.clone(), member.rados_namespace.clone(), member.image_name.clone());
            let _ = self.rbd.group_image_remove(&group, &image).await;
        }
        let _ = self.rbd.group_remove(&group).await;

        snapshot_result?;

        let member_snapshots = members
            .iter()
            .map(|m| Snapshot {
                request_name: format!("{}-{}", group_uuid, m.request_name),
                snapshot_id: format!("{}:{}", group_uuid, m.volume_id),
                source_volume_id: m.volume_id.clone(),
                image_name: m.image_name.clone(),
                rbd_snap_name: snap_name.clone(),
                pool: m.pool.clone(),
                journal_pool: m.journal_pool.clone(),
                size: m.actual_size,
                image_id: m.image_id.clone(),
                encryption: m.encryption.clone(),
                ready_to_use: true,
            })
            .collect();

        let group_snapshot_id = format!("{}@{}", pool, group_uuid);
        Ok(GroupSnapshot { group_snapshot_id, group_id: snap_name, member_snapshots, ready_to_use: true })
    }

    async fn snapshot_group_members(&self, group: &GroupSpec, members: &[crate::types::Volume], snap_name: &str) -> Result<(), VolumeError> {
        for member in members {
            let image = ImageSpec::new(member.pool.clone(), member.rados_namespace.clone(), member.image_name.clone());
            self.rbd.group_image_add(group, &image).await?;
        }
        self.rbd.group_snapshot_create(group, snap_name).await?;
        Ok(())
    }

    /// Rebuilds a previously created group snapshot's per-member list from
    /// the journal's group row, for `GetVolumeGroupSnapshot`. `group_snapshot_id`
    /// is the full `"{pool}@{group_uuid}"` id handed back by
    /// `create_volume_group_snapshot`.
    pub async fn get_volume_group_snapshot(
        &self,
        namespace: Option<&str>,
        group_snapshot_id: &str,
    ) -> Result<GroupSnapshot, VolumeError> {
        let (pool, group_uuid) = parse_group_snapshot_id(group_snapshot_id)?;
        let loc = self.journal_loc(pool, namespace);
        let attrs = self.journal.get_group_attributes(&loc, group_uuid).await?;
        let snap_name = attrs
            .name
            .ok_or_else(|| VolumeError::not_found(ResourceKind::GroupSnapshot, group_snapshot_id))?;

        let mut member_snapshots = Vec::with_capacity(attrs.member_volume_ids.len());
        for volume_id in &attrs.member_volume_ids {
            let member = self.resolve_volume(volume_id).await?;
            member_snapshots.push(Snapshot {
                request_name: format!("{}-{}", group_uuid, member.request_name),
                snapshot_id: format!("{}:{}", group_uuid, member.volume_id),
                source_volume_id: member.volume_id.clone(),
                image_name: member.image_name.clone(),
                rbd_snap_name: snap_name.clone(),
                pool: member.pool.clone(),
                journal_pool: member.journal_pool.clone(),
                size: member.actual_size,
                image_id: member.image_id.clone(),
                encryption: member.encryption.clone(),
                ready_to_use: true,
            });
        }

        Ok(GroupSnapshot {
            group_snapshot_id: group_snapshot_id.to_string(),
            group_id: snap_name,
            member_snapshots,
            ready_to_use: true,
        })
    }

    /// spec.md §4.F: removes each member's group snapshot and the
    /// journal's group row. Idempotent against an already-gone row.
    pub async fn delete_volume_group_snapshot(
        &self,
        namespace: Option<&str>,
        group_snapshot_id: &str,
    ) -> Result<(), VolumeError> {
        let (pool, group_uuid) = match parse_group_snapshot_id(group_snapshot_id) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(()),
        };
        let loc = self.journal_loc(pool, namespace);
        let attrs = self.journal.get_group_attributes(&loc, group_uuid).await?;
        let snap_name = match attrs.name {
            Some(name) => name,
            None => return Ok(()),
        };

        for volume_id in &attrs.member_volume_ids {
            if let Ok(member) = self.resolve_volume(volume_id).await {
                let image = ImageSpec::new(member.pool.clone(), member.rados_namespace.clone(), member.image_name.clone());
                let _ = self.rbd.remove_snapshot(&image, &snap_name).await;
            }
            self.journal.remove_volumes_mapping(&loc, group_uuid, volume_id).await?;
        }

        self.journal.delete_group(&loc, group_uuid).await?;
        Ok(())
    }
}
