//! Run a whole job in-process: split, every map task, every reduce
//! task, final merge. No coordinator, no workers, but the exact same
//! executors and file service as the cluster path, so the on-disk
//! results are identical. Handy for trying a workload out and for
//! exercising the pipeline end to end.

use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info};

use crate::error::Result;
use crate::fetch::merge_stores;
use crate::pb::{MapTask, ReduceTask};
use crate::rpc::{Actor, Node};
use crate::serve::{make_url, serve_node};
use crate::store::split_store;
use crate::Workload;

/// Standalone parameters, straight off the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the local file service; 0 picks a free one.
    pub port: u16,
    /// Directory for source and intermediate shards.
    pub tempdir: PathBuf,
    /// Number of map tasks.
    pub m: u32,
    /// Number of reduce tasks.
    pub r: u32,
    /// The input pair store.
    pub input: PathBuf,
    /// Where the merged output store goes.
    pub output: PathBuf,
}

/// Run `workload` over the input store, sequentially.
pub async fn run(cfg: Config, workload: Workload) -> Result<()> {
    let Config {
        port,
        tempdir,
        m,
        r,
        input,
        output,
    } = cfg;
    tokio::fs::create_dir_all(&tempdir).await?;

    let listener = TcpListener::bind(("localhost", port)).await?;
    let host = format!("localhost:{}", listener.local_addr()?.port());
    let (done_tx, _done_rx) = mpsc::unbounded_channel();
    let actor = Actor::spawn(Node::idle(done_tx));
    let serve_dir = tempdir.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_node(listener, serve_dir, actor).await {
            error!("node endpoint failed: {e}");
        }
    });

    let (split_input, split_dir) = (input.clone(), tempdir.clone());
    task::spawn_blocking(move || {
        split_store(&split_input, &split_dir, m, |i| format!("map_{i}_source.db"))
    })
    .await??;
    info!("split {} into {} source shards", input.display(), m);

    for n in 0..m {
        let task = MapTask {
            m,
            r,
            n,
            source_host: host.clone(),
        };
        task.process(&tempdir, &workload).await?;
    }

    let source_hosts = vec![host.clone(); m as usize];
    let mut urls = Vec::with_capacity(r as usize);
    for n in 0..r {
        let task = ReduceTask {
            m,
            r,
            n,
            source_hosts: source_hosts.clone(),
        };
        task.process(&tempdir, &workload).await?;
        urls.push(make_url(&host, &task.output_file()));
    }

    let merged = merge_stores(&urls, &output, &tempdir.join("tmp.db")).await?;
    let rows = task::spawn_blocking(move || merged.count()).await??;
    info!("output store {} holds {} rows", output.display(), rows);

    tokio::fs::remove_dir_all(&tempdir).await?;
    Ok(())
}
