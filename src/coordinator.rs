//! The coordinator: task queue, phase state machine, worker registry
//! and the final merge.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::fetch::merge_stores;
use crate::pb::{JobDone, MapTask, Phase, ReduceTask};
use crate::rpc::{self, Actor, Node};
use crate::serve::{make_url, serve_node};
use crate::store::split_store;

/// Coordinator parameters, straight off the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on; 0 picks a free one.
    pub port: u16,
    /// Hold the job in the wait phase until the operator presses enter.
    pub wait: bool,
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

/// A coordinator bound to its port but not yet running. Splitting bind
/// from run lets callers learn the address before any worker dials in.
pub struct Coordinator {
    cfg: Config,
    listener: TcpListener,
    host: String,
}

impl Coordinator {
    pub async fn bind(cfg: Config) -> Result<Self> {
        let listener = TcpListener::bind(("localhost", cfg.port)).await?;
        let host = format!("localhost:{}", listener.local_addr()?.port());
        Ok(Self {
            cfg,
            listener,
            host,
        })
    }

    /// The address workers should dial.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run the job to completion: split, dispatch, merge, shut down.
    pub async fn run(self) -> Result<()> {
        let Config {
            wait,
            tempdir,
            m,
            r,
            input,
            output,
            ..
        } = self.cfg;
        let host = self.host;
        tokio::fs::create_dir_all(&tempdir).await?;

        // Split the input and serve the source shards to map workers.
        let (split_input, split_dir) = (input.clone(), tempdir.clone());
        let shards = task::spawn_blocking(move || {
            split_store(&split_input, &split_dir, m, |i| format!("map_{i}_source.db"))
        })
        .await??;
        info!("split {} into {} source shards", input.display(), shards.len());

        // The full task list. Reduce tasks start incomplete: their
        // source hosts are only known once the map phase is over.
        let map_tasks: Vec<MapTask> = (0..m)
            .map(|n| MapTask {
                m,
                r,
                n,
                source_host: host.clone(),
            })
            .collect();
        let reduce_tasks: Vec<ReduceTask> = (0..r)
            .map(|n| ReduceTask {
                m,
                r,
                n,
                source_hosts: Vec::new(),
            })
            .collect();

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let phase = if wait { Phase::Wait } else { Phase::Map };
        let actor = Actor::spawn(Node::new(
            phase,
            map_tasks,
            reduce_tasks.clone(),
            done_tx,
        ));

        let serve_dir = tempdir.clone();
        let serve_actor = actor.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_node(self.listener, serve_dir, serve_actor).await {
                error!("node endpoint failed: {e}");
            }
        });

        if wait {
            info!("coordinator at {} waiting for operator input", host);
            println!("Press enter to start...");
            let mut line = String::new();
            BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

            let workers = actor
                .run(|node| {
                    node.phase = Phase::Map;
                    node.workers.iter().cloned().collect::<Vec<_>>()
                })
                .await?;
            info!("starting {} workers", workers.len());
            for addr in workers {
                if let Err(e) = rpc::signal(&addr).await {
                    warn!("contacting worker {addr}: {e}");
                }
            }
        } else {
            info!("coordinator at {} waiting for workers", host);
        }

        let reduce_hosts = wait_for_jobs(&actor, &mut done_rx).await?;

        // Gather the reduce outputs into the final store.
        let urls: Vec<String> = reduce_tasks
            .iter()
            .zip(&reduce_hosts)
            .map(|(task, host)| make_url(host, &task.output_file()))
            .collect();
        let merged = merge_stores(&urls, &output, &tempdir.join("tmp.db")).await?;
        let rows = task::spawn_blocking(move || merged.count()).await??;
        info!("output store {} holds {} rows", output.display(), rows);

        // Tell every registered worker to shut down, then clean up.
        let workers = actor
            .run(|node| {
                node.phase = Phase::Finish;
                node.workers.iter().cloned().collect::<Vec<_>>()
            })
            .await?;
        for addr in workers {
            info!("shutting down worker at {addr}");
            if let Err(e) = rpc::signal(&addr).await {
                warn!("shutting down worker {addr}: {e}");
            }
        }
        tokio::fs::remove_dir_all(&tempdir).await?;
        info!("coordinator shutting down");
        Ok(())
    }
}

/// Drain the done stream until every phase is complete, returning the
/// host that served each reduce task's output. All bookkeeping happens
/// under the actor; this loop only decides when to stop.
async fn wait_for_jobs(
    actor: &Actor,
    done: &mut mpsc::UnboundedReceiver<JobDone>,
) -> Result<Vec<String>> {
    loop {
        let task = done.recv().await.ok_or(Error::ActorStopped)?;
        if let Some(hosts) = actor.run(move |node| node.record_completion(task)).await? {
            return Ok(hosts);
        }
    }
}
