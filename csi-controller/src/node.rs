//! CSI `Node` service. Device mapping (krbd/rbd-nbd selection, mount/format,
//! `xfsSupportsReflink` autodetection) is a node-side collaborator outside
//! this control plane's scope (spec.md §9, SPEC_FULL.md Non-goals); the one
//! piece of the contract this crate owns is the `image-meta.json` stash
//! under the staging path so `NodeUnstageVolume` can still find what to
//! unmap after a node restart.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tonic::{Request, Response, Status};

use csi_proto::node_server::Node;
use csi_proto::*;

#[derive(Default)]
pub(crate) struct NodeService;

/// The minimal record this control plane persists at `<staging_path>/image-meta.json`,
/// grounded on the teacher's `image-meta.json` contract referenced in
/// spec.md §9 for `NodeUnstageVolume`'s restart recovery.
#[derive(Debug, Serialize, Deserialize)]
struct ImageMeta {
    volume_id: String,
    volume_context: std::collections::HashMap<String, String>,
}

fn meta_path(staging_target_path: &str) -> PathBuf {
    PathBuf::from(staging_target_path).join("image-meta.json")
}

fn unimplemented(verb: &str) -> Status {
    Status::internal(format!("{} is not implemented on this node plugin", verb))
}

#[tonic::async_trait]
impl Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        let meta = ImageMeta { volume_id: req.volume_id.clone(), volume_context: req.volume_context.clone() };
        let path = meta_path(&req.staging_target_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Status::internal(format!("failed to create staging path: {}", e)))?;
        }
        let json = serde_json::to_string(&meta).map_err(|e| Status::internal(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| Status::internal(format!("failed to stash image-meta.json: {}", e)))?;
        Err(unimplemented("device mapping for NodeStageVolume"))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        let path = meta_path(&req.staging_target_path);
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let _meta: ImageMeta = serde_json::from_str(&raw).map_err(|e| Status::internal(e.to_string()))?;
                let _ = std::fs::remove_file(&path);
                Err(unimplemented("device unmapping for NodeUnstageVolume"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Response::new(NodeUnstageVolumeResponse {})),
            Err(e) => Err(Status::internal(format!("failed to read image-meta.json: {}", e))),
        }
    }

    async fn node_publish_volume(
        &self,
        _request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        Err(unimplemented("NodePublishVolume"))
    }

    async fn node_unpublish_volume(
        &self,
        _request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        Err(unimplemented("NodeUnpublishVolume"))
    }

    async fn node_expand_volume(
        &self,
        _request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        Err(unimplemented("NodeExpandVolume"))
    }

    async fn node_get_volume_stats(
        &self,
        _request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        Err(unimplemented("NodeGetVolumeStats"))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        Ok(Response::new(NodeGetCapabilitiesResponse { capabilities: vec![] }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        let node_id = std::env::var("NODE_ID").unwrap_or_else(|_| "unknown-node".to_string());
        Ok(Response::new(NodeGetInfoResponse { node_id, max_volumes_per_node: 0, accessible_topology: None }))
    }
}
