//! The per-node HTTP endpoint.
//!
//! Every node (coordinator and workers alike) serves two things on one
//! port: the `NodeActor` gRPC service, and the node's temp directory
//! under `GET /data/<filename>` so peers can pull shards by name.

use std::path::PathBuf;

use axum::Router;
use tokio::net::TcpListener;
use tonic::service::Routes;
use tower_http::services::ServeDir;
use tracing::info;

use crate::error::Result;
use crate::pb::node_actor_server::NodeActorServer;
use crate::rpc::{Actor, NodeService};

/// URL of `file` in `host`'s data directory.
pub fn make_url(host: &str, file: &str) -> String {
    format!("http://{host}/data/{file}")
}

/// Serve `tempdir` and the node's RPC endpoint on `listener` until the
/// process exits. Spawned once per node.
pub async fn serve_node(listener: TcpListener, tempdir: PathBuf, actor: Actor) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("serving {}/* at {}", tempdir.display(), make_url(&addr.to_string(), "*"));

    let grpc = NodeActorServer::new(NodeService::new(actor));
    let router = Router::new()
        .nest_service("/data", ServeDir::new(tempdir))
        .merge(Routes::new(grpc).into_axum_router());

    axum::serve(listener, router).await?;
    Ok(())
}
