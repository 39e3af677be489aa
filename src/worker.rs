//! The worker: register with the coordinator, poll for jobs, run them,
//! report back, and serve the resulting shards to peers until told to
//! shut down.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::pb::{job, JobDone, JobRequest, Phase, PingRequest};
use crate::rpc::{self, Actor, Node};
use crate::serve::serve_node;
use crate::{Workload, REQUEST_INTERVAL_MS};

/// Worker parameters, straight off the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on; 0 picks a free one.
    pub port: u16,
    /// Address of the coordinator.
    pub master_addr: String,
    /// Directory for downloaded and produced shards.
    pub tempdir: PathBuf,
}

/// A worker bound to its port but not yet polling.
pub struct Worker {
    cfg: Config,
    listener: TcpListener,
    host: String,
}

impl Worker {
    pub async fn bind(cfg: Config) -> Result<Self> {
        let listener = TcpListener::bind(("localhost", cfg.port)).await?;
        let host = format!("localhost:{}", listener.local_addr()?.port());
        Ok(Self {
            cfg,
            listener,
            host,
        })
    }

    /// The address this worker advertises to the coordinator, and on
    /// which it serves its shards.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Register, then poll for jobs until the coordinator runs out.
    pub async fn run(self, workload: Workload) -> Result<()> {
        let tempdir = self.cfg.tempdir;
        let host = self.host;
        tokio::fs::create_dir_all(&tempdir).await?;

        // Serve our shards (and our own RPC endpoint) to peers.
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let actor = Actor::spawn(Node::idle(done_tx));
        let serve_dir = tempdir.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_node(self.listener, serve_dir, actor).await {
                error!("node endpoint failed: {e}");
            }
        });

        let mut master = rpc::connect(&self.cfg.master_addr).await?;
        let reply = master
            .ping(PingRequest { addr: host.clone() })
            .await?
            .into_inner();
        if reply.wait {
            info!("waiting for coordinator to start the job");
            done_rx.recv().await;
        }

        let mut ticker = time::interval(Duration::from_millis(REQUEST_INTERVAL_MS));
        let mut last_phase = Phase::Wait;
        loop {
            ticker.tick().await;

            let job = match master.request_job(JobRequest { addr: host.clone() }).await {
                Ok(reply) => reply.into_inner(),
                // Once the reduce phase has drained the coordinator may
                // exit between our polls; that is a normal shutdown.
                Err(status) if last_phase >= Phase::ReduceDone => {
                    debug!("coordinator gone after {:?}: {}", last_phase, status);
                    break;
                }
                Err(status) => return Err(status.into()),
            };

            let phase = job.phase();
            if job.wait {
                // Log why we are parked, but only on a phase change.
                if phase != last_phase {
                    match phase {
                        Phase::MapDone => info!("waiting for map tasks to finish"),
                        Phase::ReduceDone => info!("waiting for reduce tasks to finish"),
                        Phase::Merge => info!("waiting for the final merge"),
                        _ => {}
                    }
                }
                if phase == Phase::Finish {
                    break;
                }
            } else {
                let number = match (phase, job.task) {
                    (Phase::Map, Some(job::Task::MapTask(task))) => {
                        info!("received map task {}", task.n);
                        task.process(&tempdir, &workload).await?;
                        task.n
                    }
                    (Phase::Reduce, Some(job::Task::ReduceTask(task))) => {
                        info!("received reduce task {}", task.n);
                        task.process(&tempdir, &workload).await?;
                        task.n
                    }
                    (phase, task) => {
                        return Err(Error::Protocol(format!(
                            "job envelope does not match phase {phase:?}: {task:?}"
                        )))
                    }
                };
                master
                    .finish_job(JobDone {
                        number,
                        addr: host.clone(),
                    })
                    .await?;
            }
            last_phase = phase;
        }

        // Keep serving shards until the coordinator has merged them.
        info!("waiting for coordinator to finish");
        done_rx.recv().await;

        tokio::fs::remove_dir_all(&tempdir).await?;
        info!("worker shutting down");
        Ok(())
    }
}
