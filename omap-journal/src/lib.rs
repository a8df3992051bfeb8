pub mod attributes;
pub mod kv;
mod journal;

pub use attributes::{GroupAttributes, ReservationRequest, VolumeAttributes};
pub use journal::{Journal, JournalError, JournalKind, JournalLocation};
pub use kv::{KvError, KvStore, MemKvStore};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const VOL: JournalKind = JournalKind::Volume;

    fn journal() -> Journal {
        Journal::new(Arc::new(MemKvStore::new()), "test-instance")
    }

    #[tokio::test]
    async fn reserve_then_check_round_trips() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        let req = ReservationRequest::default();

        let (uuid, image_name) = j.reserve_name(&loc, VOL, "pvc-A", &req).await.unwrap();
        assert_eq!(image_name, format!("csi-vol-{}", uuid));

        let found = j.check_reservation(&loc, VOL, "pvc-A").await.unwrap().unwrap();
        assert_eq!(found.uuid, uuid.to_string());
        assert_eq!(found.image_name, image_name);
        assert_eq!(found.request_name, "pvc-A");
    }

    #[tokio::test]
    async fn check_reservation_of_unknown_name_is_none() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        assert!(j.check_reservation(&loc, VOL, "pvc-nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeat_reservation_with_same_attributes_is_idempotent() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        let req = ReservationRequest { owner: Some("tenant-a".into()), ..Default::default() };

        let (uuid1, name1) = j.reserve_name(&loc, VOL, "pvc-A", &req).await.unwrap();
        let (uuid2, name2) = j.reserve_name(&loc, VOL, "pvc-A", &req).await.unwrap();
        assert_eq!(uuid1, uuid2);
        assert_eq!(name1, name2);
    }

    #[tokio::test]
    async fn reservation_with_different_attributes_conflicts() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        let req1 = ReservationRequest { source_image_name: Some("vol-a".into()), ..Default::default() };
        let req2 = ReservationRequest { source_image_name: Some("vol-b".into()), ..Default::default() };

        j.reserve_name(&loc, VOL, "pvc-A", &req1).await.unwrap();
        let err = j.reserve_name(&loc, VOL, "pvc-A", &req2).await.unwrap_err();
        assert!(matches!(err, JournalError::NameConflict { .. }));
    }

    #[tokio::test]
    async fn undo_reservation_clears_both_directions() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        let req = ReservationRequest::default();

        let (uuid, _) = j.reserve_name(&loc, VOL, "pvc-A", &req).await.unwrap();
        j.undo_reservation(&loc, VOL, "pvc-A", &uuid.to_string()).await.unwrap();

        assert!(j.check_reservation(&loc, VOL, "pvc-A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undo_reservation_is_idempotent_against_already_gone() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        j.undo_reservation(&loc, VOL, "pvc-never-existed", "00000000-0000-0000-0000-000000000000").await.unwrap();
    }

    #[tokio::test]
    async fn store_image_id_is_visible_on_check_reservation() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        let (uuid, _) = j.reserve_name(&loc, VOL, "pvc-A", &ReservationRequest::default()).await.unwrap();

        j.store_image_id(&loc, VOL, &uuid.to_string(), "backend-id-123").await.unwrap();
        let found = j.check_reservation(&loc, VOL, "pvc-A").await.unwrap().unwrap();
        assert_eq!(found.image_id.as_deref(), Some("backend-id-123"));

        j.reset_image_id(&loc, VOL, &uuid.to_string()).await.unwrap();
        let found = j.check_reservation(&loc, VOL, "pvc-A").await.unwrap().unwrap();
        assert_eq!(found.image_id, None);
    }

    #[tokio::test]
    async fn group_membership_round_trips() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        j.create_group(&loc, "group-1", "csi-vg-group-1").await.unwrap();
        j.add_volumes_mapping(&loc, "group-1", "vol-a").await.unwrap();
        j.add_volumes_mapping(&loc, "group-1", "vol-b").await.unwrap();

        let attrs = j.get_group_attributes(&loc, "group-1").await.unwrap();
        assert_eq!(attrs.name.as_deref(), Some("csi-vg-group-1"));
        assert_eq!(attrs.member_volume_ids.len(), 2);

        j.remove_volumes_mapping(&loc, "group-1", "vol-a").await.unwrap();
        let attrs = j.get_group_attributes(&loc, "group-1").await.unwrap();
        assert_eq!(attrs.member_volume_ids, vec!["vol-b".to_string()]);
    }

    #[tokio::test]
    async fn owner_can_be_stored_and_reset() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        let (uuid, _) = j.reserve_name(&loc, VOL, "pvc-A", &ReservationRequest::default()).await.unwrap();

        j.store_image_owner(&loc, VOL, &uuid.to_string(), "tenant-a").await.unwrap();
        let found = j.check_reservation(&loc, VOL, "pvc-A").await.unwrap().unwrap();
        assert_eq!(found.owner.as_deref(), Some("tenant-a"));

        j.reset_volume_owner(&loc, VOL, &uuid.to_string()).await.unwrap();
        let found = j.check_reservation(&loc, VOL, "pvc-A").await.unwrap().unwrap();
        assert_eq!(found.owner, None);
    }

    #[tokio::test]
    async fn snapshot_kind_uses_a_disjoint_namespace_from_volume_kind() {
        let j = journal();
        let loc = JournalLocation::new("rbd", None);
        j.reserve_name(&loc, JournalKind::Volume, "shared-name", &ReservationRequest::default()).await.unwrap();
        assert!(j.check_reservation(&loc, JournalKind::Snapshot, "shared-name").await.unwrap().is_none());
    }
}
