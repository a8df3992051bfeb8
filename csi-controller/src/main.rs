//! CSI gRPC server binary: parses CLI flags, loads the
//! [`common::ControllerConfig`], builds one [`volume_engine::Engine`] per
//! configured cluster and serves the `Identity`/`Controller`/`Node`
//! services over the CSI endpoint.
//!
//! Grounded on the teacher's `control-plane/agents/core/src/server.rs`
//! `CliArgs`/`init_tracing`/`#[tokio::main]` shape, adapted from
//! `structopt` to `clap::Parser` per the ambient-stack workspace
//! dependencies; the unix-vs-tcp endpoint split follows the older
//! `csi/src/server.rs::main` (`--grpc-endpoint`, `UnixListener::bind`).

mod controller;
mod identity;
mod node;

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use common::ControllerConfig;
use csi_proto::{controller_server::ControllerServer, identity_server::IdentityServer, node_server::NodeServer};
use rbd_client::fake::{FakeRbdClient, FakeTaskManager};
use omap_journal::MemKvStore;
use volume_engine::Engine;

#[derive(Debug, Parser)]
#[command(name = "csi-controller", about = "Volume lifecycle control plane for RBD-backed CSI volumes")]
struct CliArgs {
    /// Path to the controller config file (YAML).
    #[arg(long, env = "CSI_CONFIG")]
    config: String,

    /// CSI endpoint to listen on: `unix:///path/to.sock` or `tcp://host:port`.
    #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:///csi/csi.sock")]
    endpoint: String,

    /// This plugin instance's id, stamped into the journal's `csi.instance`.
    #[arg(long, env = "CSI_INSTANCE_ID")]
    instance_id: Option<String>,
}

/// One `Engine` per configured cluster, chosen per-request by the
/// `clusterID` CreateVolume parameter (spec.md §6 "Config interface").
pub(crate) struct Engines(HashMap<String, Arc<Engine>>);

impl Engines {
    pub(crate) fn get(&self, cluster_id: &str) -> Result<&Arc<Engine>, tonic::Status> {
        self.0
            .get(cluster_id)
            .ok_or_else(|| tonic::Status::invalid_argument(format!("unknown clusterID '{}'", cluster_id)))
    }

    /// Routes a `volume_id`/`snapshot_id` token to its cluster's engine
    /// without needing the request to repeat `clusterID` (the token
    /// already carries it, spec.md §4.B). Falls back to every configured
    /// engine for a migration id, which has no `cluster_id` field.
    pub(crate) fn for_token(&self, token: &str) -> Box<dyn Iterator<Item = &Arc<Engine>> + Send + '_> {
        if identity_codec::is_migration(token) {
            return Box::new(self.0.values());
        }
        match identity_codec::Identity::decode(token) {
            Ok(identity) => Box::new(self.0.get(&identity.cluster_id).into_iter()),
            Err(_) => Box::new(self.0.values()),
        }
    }
}

fn build_engines(config: &ControllerConfig) -> Engines {
    let mut engines = HashMap::new();
    for cluster in &config.clusters {
        // The real librbd/rados binding is explicitly out of scope
        // (spec.md §1 "explicitly out of scope: external collaborators,
        // interfaces only"); this process wires the in-memory fakes as the
        // standing-in backend rather than fabricating a vendor binding.
        let rbd = Arc::new(FakeRbdClient::new());
        let task_manager = Arc::new(FakeTaskManager::new(rbd.clone()));
        let kv = Arc::new(MemKvStore::new());
        let engine = Engine::new(
            cluster.cluster_id.clone(),
            config.instance_id.clone(),
            kv,
            rbd,
            task_manager,
            config.depth_limits,
            config.snapshot_limits,
        );
        engines.insert(cluster.cluster_id.clone(), Arc::new(engine));
    }
    Engines(engines)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    common::logging::init_tracing();

    let cli_args = CliArgs::parse();
    info!(endpoint = %cli_args.endpoint, config = %cli_args.config, "starting csi-controller");

    let config = ControllerConfig::from_yaml_file(&cli_args.config)?;
    let engines = Arc::new(build_engines(&config));

    let identity = identity::IdentityService::default();
    let controller = controller::ControllerService::new(engines.clone());
    let node = node::NodeService::default();

    let server = tonic::transport::Server::builder()
        .add_service(IdentityServer::new(identity))
        .add_service(ControllerServer::new(controller))
        .add_service(NodeServer::new(node));

    if let Some(path) = cli_args.endpoint.strip_prefix("unix://") {
        let _ = std::fs::remove_file(path);
        let listener = tokio::net::UnixListener::bind(path)?;
        let stream = tokio_stream::wrappers::UnixListenerStream::new(listener);
        info!(path, "listening on unix socket");
        server.serve_with_incoming(stream).await?;
    } else if let Some(addr) = cli_args.endpoint.strip_prefix("tcp://") {
        let addr = addr.parse()?;
        info!(%addr, "listening on tcp");
        server.serve(addr).await?;
    } else {
        return Err(format!("unsupported endpoint scheme in '{}'", cli_args.endpoint).into());
    }

    Ok(())
}
