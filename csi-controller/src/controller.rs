//! CSI `Controller` service: translates each RPC into one
//! `volume_engine::Engine` call, per spec.md §4.D-§4.F and §6.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use rbd_client::ImageFeature;
use volume_engine::{ContentSource, EncryptionConfig, GroupSnapshot, Snapshot, Volume, VolumeSpec};

use csi_proto::controller_server::Controller;
use csi_proto::*;

use crate::Engines;

pub(crate) struct ControllerService {
    engines: Arc<Engines>,
}

impl ControllerService {
    pub(crate) fn new(engines: Arc<Engines>) -> Self {
        Self { engines }
    }
}

fn parse_feature_set(raw: Option<&String>) -> Vec<ImageFeature> {
    match raw {
        Some(value) => value
            .split(',')
            .filter_map(|f| match f.trim() {
                "layering" => Some(ImageFeature::Layering),
                "deep-flatten" => Some(ImageFeature::DeepFlatten),
                "exclusive-lock" => Some(ImageFeature::ExclusiveLock),
                "object-map" => Some(ImageFeature::ObjectMap),
                "fast-diff" => Some(ImageFeature::FastDiff),
                "journaling" => Some(ImageFeature::Journaling),
                "" => None,
                other => {
                    tracing::warn!(feature = other, "ignoring unrecognized imageFeatures entry");
                    None
                }
            })
            .collect(),
        None => vec![ImageFeature::Layering],
    }
}

fn volume_spec_from_request(req: &CreateVolumeRequest) -> Result<(String, VolumeSpec), Status> {
    let params = &req.parameters;
    let cluster_id = params
        .get("clusterID")
        .cloned()
        .ok_or_else(|| Status::invalid_argument("missing required parameter 'clusterID'"))?;
    let pool = params.get("pool").cloned().ok_or_else(|| Status::invalid_argument("missing required parameter 'pool'"))?;

    let content_source = match &req.volume_content_source {
        Some(VolumeContentSource { r#type: Some(volume_content_source::Type::Volume(v)) }) => {
            ContentSource::Volume(v.volume_id.clone())
        }
        Some(VolumeContentSource { r#type: Some(volume_content_source::Type::Snapshot(s)) }) => {
            ContentSource::Snapshot(s.snapshot_id.clone())
        }
        _ => ContentSource::None,
    };

    let encryption = match (params.get("encrypted"), params.get("encryptionKMSID")) {
        (Some(flag), Some(kms_id)) if flag == "true" => {
            Some(EncryptionConfig { kms_id: kms_id.clone(), encryption_type: "luks".to_string() })
        }
        _ => None,
    };

    let size_bytes = req.capacity_range.as_ref().map(|r| r.required_bytes.max(0) as u64).unwrap_or(0);

    let spec = VolumeSpec {
        request_name: req.name.clone(),
        size_bytes,
        cluster_id: cluster_id.clone(),
        pool: pool.clone(),
        journal_pool: params.get("journalPool").cloned().unwrap_or_default(),
        data_pool: params.get("dataPool").cloned(),
        rados_namespace: params.get("radosNamespace").cloned(),
        name_prefix: params.get("volumeNamePrefix").cloned(),
        feature_set: parse_feature_set(params.get("imageFeatures")),
        mounter: params.get("mounter").cloned(),
        encryption,
        owner: params.get("csi.storage.k8s.io/pvc/name").cloned(),
        content_source,
    };
    Ok((cluster_id, spec))
}

fn volume_to_proto(volume: Volume) -> csi_proto::Volume {
    let mut volume_context = std::collections::HashMap::new();
    volume_context.insert("pool".to_string(), volume.pool.clone());
    volume_context.insert("clusterID".to_string(), volume.cluster_id.clone());
    if let Some(ns) = &volume.rados_namespace {
        volume_context.insert("radosNamespace".to_string(), ns.clone());
    }
    csi_proto::Volume {
        capacity_bytes: volume.actual_size as i64,
        volume_id: volume.volume_id,
        volume_context,
        content_source: None,
        accessible_topology: vec![],
    }
}

fn snapshot_to_proto(snapshot: Snapshot) -> csi_proto::Snapshot {
    csi_proto::Snapshot {
        size_bytes: snapshot.size as i64,
        snapshot_id: snapshot.snapshot_id,
        source_volume_id: snapshot.source_volume_id,
        ready_to_use: snapshot.ready_to_use,
    }
}

fn group_snapshot_to_proto(group_snapshot: GroupSnapshot) -> VolumeGroupSnapshot {
    VolumeGroupSnapshot {
        group_snapshot_id: group_snapshot.group_snapshot_id,
        snapshots: group_snapshot.member_snapshots.into_iter().map(snapshot_to_proto).collect(),
        ready_to_use: group_snapshot.ready_to_use,
    }
}

#[tonic::async_trait]
impl Controller for ControllerService {
    #[instrument(skip(self, request), fields(request_name = %request.get_ref().name))]
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let req = request.into_inner();
        let (cluster_id, spec) = volume_spec_from_request(&req)?;
        let engine = self.engines.get(&cluster_id)?;

        let volume = engine.create_volume(spec).await?;
        info!(volume_id = %volume.volume_id, "volume created");
        Ok(Response::new(CreateVolumeResponse { volume: Some(volume_to_proto(volume)) }))
    }

    #[instrument(skip(self, request), fields(volume_id = %request.get_ref().volume_id))]
    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        let req = request.into_inner();
        for engine in self.engines.for_token(&req.volume_id) {
            engine.delete_volume(&req.volume_id).await?;
        }
        info!("volume deleted");
        Ok(Response::new(DeleteVolumeResponse {}))
    }

    #[instrument(skip(self, request), fields(volume_id = %request.get_ref().volume_id))]
    async fn controller_expand_volume(
        &self,
        request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        let requested_size = req.capacity_range.as_ref().map(|r| r.required_bytes.max(0) as u64).unwrap_or(0);

        let mut result = None;
        for engine in self.engines.for_token(&req.volume_id) {
            match engine.expand_volume(&req.volume_id, requested_size).await {
                Ok(size) => {
                    result = Some(size);
                    break;
                }
                Err(common::VolumeError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let capacity_bytes = result.ok_or_else(|| Status::not_found(format!("volume '{}' not found", req.volume_id)))?;
        Ok(Response::new(ControllerExpandVolumeResponse {
            capacity_bytes: capacity_bytes as i64,
            node_expansion_required: true,
        }))
    }

    #[instrument(skip(self, request), fields(source_volume_id = %request.get_ref().source_volume_id))]
    async fn create_snapshot(
        &self,
        request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        let req = request.into_inner();
        let mut created = None;
        for engine in self.engines.for_token(&req.source_volume_id) {
            match engine.create_snapshot(&req.name, &req.source_volume_id).await {
                Ok(snapshot) => {
                    created = Some(snapshot);
                    break;
                }
                Err(common::VolumeError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let snapshot =
            created.ok_or_else(|| Status::not_found(format!("source volume '{}' not found", req.source_volume_id)))?;
        Ok(Response::new(CreateSnapshotResponse { snapshot: Some(snapshot_to_proto(snapshot)) }))
    }

    #[instrument(skip(self, request), fields(snapshot_id = %request.get_ref().snapshot_id))]
    async fn delete_snapshot(
        &self,
        request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        let req = request.into_inner();
        for engine in self.engines.for_token(&req.snapshot_id) {
            engine.delete_snapshot(&req.snapshot_id).await?;
        }
        Ok(Response::new(DeleteSnapshotResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        let req = request.into_inner();
        for engine in self.engines.for_token(&req.volume_id) {
            if engine.resolve_volume(&req.volume_id).await.is_ok() {
                return Ok(Response::new(ValidateVolumeCapabilitiesResponse {
                    confirmed: Some(validate_volume_capabilities_response::Confirmed {
                        volume_context: req.volume_context,
                        volume_capabilities: req.volume_capabilities,
                        parameters: req.parameters,
                    }),
                    message: String::new(),
                }));
            }
        }
        Err(Status::not_found(format!("volume '{}' not found", req.volume_id)))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        use controller_service_capability::{rpc, Rpc, Type};
        let rpcs = [
            rpc::Type::CreateDeleteVolume,
            rpc::Type::ExpandVolume,
            rpc::Type::CreateDeleteSnapshot,
            rpc::Type::CloneVolume,
            rpc::Type::GetVolumeGroupSnapshot,
        ];
        let capabilities = rpcs
            .into_iter()
            .map(|r#type| ControllerServiceCapability { r#type: Some(Type::Rpc(Rpc { r#type: r#type as i32 })) })
            .collect();
        Ok(Response::new(ControllerGetCapabilitiesResponse { capabilities }))
    }

    #[instrument(skip(self, request), fields(name = %request.get_ref().name))]
    async fn create_volume_group_snapshot(
        &self,
        request: Request<CreateVolumeGroupSnapshotRequest>,
    ) -> Result<Response<CreateVolumeGroupSnapshotResponse>, Status> {
        let req = request.into_inner();
        let pool = req
            .parameters
            .get("pool")
            .cloned()
            .ok_or_else(|| Status::invalid_argument("missing required parameter 'pool'"))?;
        let namespace = req.parameters.get("radosNamespace").cloned();

        let first_member =
            req.source_volume_ids.first().ok_or_else(|| Status::invalid_argument("no source_volume_ids given"))?;
        let mut result = None;
        for engine in self.engines.for_token(first_member) {
            match engine.create_volume_group_snapshot(&pool, namespace.as_deref(), &req.source_volume_ids).await {
                Ok(group_snapshot) => {
                    result = Some(group_snapshot);
                    break;
                }
                Err(common::VolumeError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let group_snapshot = result.ok_or_else(|| Status::not_found("no member volume resolved on any cluster"))?;
        Ok(Response::new(CreateVolumeGroupSnapshotResponse {
            group_snapshot: Some(group_snapshot_to_proto(group_snapshot)),
        }))
    }

    async fn delete_volume_group_snapshot(
        &self,
        request: Request<DeleteVolumeGroupSnapshotRequest>,
    ) -> Result<Response<DeleteVolumeGroupSnapshotResponse>, Status> {
        let req = request.into_inner();
        for engine in self.engines.0.values() {
            engine.delete_volume_group_snapshot(None, &req.group_snapshot_id).await?;
        }
        Ok(Response::new(DeleteVolumeGroupSnapshotResponse {}))
    }

    async fn get_volume_group_snapshot(
        &self,
        request: Request<GetVolumeGroupSnapshotRequest>,
    ) -> Result<Response<GetVolumeGroupSnapshotResponse>, Status> {
        let req = request.into_inner();
        for engine in self.engines.0.values() {
            match engine.get_volume_group_snapshot(None, &req.group_snapshot_id).await {
                Ok(group_snapshot) => {
                    return Ok(Response::new(GetVolumeGroupSnapshotResponse {
                        group_snapshot: Some(group_snapshot_to_proto(group_snapshot)),
                    }))
                }
                Err(common::VolumeError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Status::not_found(format!("group snapshot '{}' not found", req.group_snapshot_id)))
    }
}
