//! Node state and the actor that guards it.
//!
//! Every node owns a [`Node`] record that is mutated only by a single
//! long-running task consuming an event stream. RPC handlers submit a
//! closure to the stream and await its execution, so each handler's
//! view of the node is atomic without any locking.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, oneshot};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pb::node_actor_client::NodeActorClient;
use crate::pb::node_actor_server::NodeActor as NodeActorRpc;
use crate::pb::{job, Empty, Job, JobDone, JobRequest, MapTask, Phase, PingRequest, PingReply, ReduceTask};

/////////////////////////////////////////////////////////////////////////////
// Node state
/////////////////////////////////////////////////////////////////////////////

/// Shared state of one coordinator or worker process.
pub struct Node {
    pub phase: Phase,
    /// Index of the next unassigned task within the current phase.
    pub next_job: usize,
    /// Completed tasks within the current phase.
    pub done_jobs: usize,
    pub map_tasks: Vec<MapTask>,
    pub reduce_tasks: Vec<ReduceTask>,
    /// Addresses of every worker that ever pinged us.
    pub workers: BTreeSet<String>,
    /// Address that completed each map task; feeds reduce source_hosts.
    map_hosts: Vec<String>,
    /// Address that completed each reduce task; feeds the final merge.
    reduce_hosts: Vec<String>,
    done: mpsc::UnboundedSender<JobDone>,
}

impl Node {
    /// Coordinator state over a full task list.
    pub fn new(
        phase: Phase,
        map_tasks: Vec<MapTask>,
        reduce_tasks: Vec<ReduceTask>,
        done: mpsc::UnboundedSender<JobDone>,
    ) -> Self {
        let m = map_tasks.len();
        let r = reduce_tasks.len();
        Self {
            phase,
            next_job: 0,
            done_jobs: 0,
            map_tasks,
            reduce_tasks,
            workers: BTreeSet::new(),
            map_hosts: vec![String::new(); m],
            reduce_hosts: vec![String::new(); r],
            done,
        }
    }

    /// Worker-side state: no tasks of its own, the done stream is only
    /// used for parking on `Signal`.
    pub fn idle(done: mpsc::UnboundedSender<JobDone>) -> Self {
        Self::new(Phase::Wait, Vec::new(), Vec::new(), done)
    }

    /// Push a completion (or a bare signal) onto the done stream.
    pub fn push_done(&self, done: JobDone) {
        // The receiver only goes away when the job is over; dropped
        // completions are meaningless then.
        let _ = self.done.send(done);
    }

    /// Hand out the next task of the current phase, or a park
    /// instruction. Assigning the last task of a phase advances
    /// Map to MapDone (and Reduce to ReduceDone) with that task still
    /// outstanding.
    pub fn next_job(&mut self) -> Job {
        let phase = self.phase;
        match phase {
            Phase::Map if self.next_job < self.map_tasks.len() => {
                let task = self.map_tasks[self.next_job].clone();
                debug!("map task {} assigned", task.n);
                self.next_job += 1;
                if self.next_job == self.map_tasks.len() {
                    self.phase = Phase::MapDone;
                }
                Job {
                    phase: phase as i32,
                    wait: false,
                    task: Some(job::Task::MapTask(task)),
                }
            }
            Phase::Reduce if self.next_job < self.reduce_tasks.len() => {
                let task = self.reduce_tasks[self.next_job].clone();
                debug!("reduce task {} assigned", task.n);
                self.next_job += 1;
                if self.next_job == self.reduce_tasks.len() {
                    self.phase = Phase::ReduceDone;
                }
                Job {
                    phase: phase as i32,
                    wait: false,
                    task: Some(job::Task::ReduceTask(task)),
                }
            }
            _ => Job {
                phase: phase as i32,
                wait: true,
                task: None,
            },
        }
    }

    /// Record one task completion. Flips Map/MapDone to Reduce once all
    /// map tasks are in (filling every reduce task's source hosts), and
    /// returns the reduce hosts once all reduce tasks are in, flipping
    /// to Merge.
    pub fn record_completion(&mut self, done: JobDone) -> Option<Vec<String>> {
        match self.phase {
            Phase::Map | Phase::MapDone => {
                self.map_hosts[done.number as usize] = done.addr;
                self.done_jobs += 1;
                if self.done_jobs == self.map_tasks.len() {
                    for task in &mut self.reduce_tasks {
                        task.source_hosts = self.map_hosts.clone();
                    }
                    info!("map phase completed");
                    self.phase = Phase::Reduce;
                    self.next_job = 0;
                    self.done_jobs = 0;
                }
                None
            }
            Phase::Reduce | Phase::ReduceDone => {
                self.reduce_hosts[done.number as usize] = done.addr;
                self.done_jobs += 1;
                if self.done_jobs == self.reduce_tasks.len() {
                    info!("reduce phase completed");
                    self.phase = Phase::Merge;
                    Some(self.reduce_hosts.clone())
                } else {
                    None
                }
            }
            phase => {
                debug!(
                    "ignoring completion in phase {:?}: host {}, number {}",
                    phase, done.addr, done.number
                );
                None
            }
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// The actor
/////////////////////////////////////////////////////////////////////////////

type Command = Box<dyn FnOnce(&mut Node) + Send>;

/// Handle to the single task that owns a [`Node`]. Cheap to clone;
/// every holder submits closures through the same event stream.
#[derive(Clone)]
pub struct Actor {
    commands: mpsc::UnboundedSender<Command>,
}

impl Actor {
    /// Take ownership of `node` and start consuming events.
    pub fn spawn(mut node: Node) -> Self {
        let (commands, mut events) = mpsc::unbounded_channel::<Command>();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                event(&mut node);
            }
        });
        Self { commands }
    }

    /// Run `f` against the node, blocking the caller (but not the
    /// thread) until it has executed.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Node) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Box::new(move |node| {
                let _ = reply_tx.send(f(node));
            }))
            .map_err(|_| Error::ActorStopped)?;
        reply_rx.await.map_err(|_| Error::ActorStopped)
    }
}

/////////////////////////////////////////////////////////////////////////////
// The RPC surface
/////////////////////////////////////////////////////////////////////////////

/// gRPC facade over a node's actor. Registered on coordinator and
/// workers alike; only a subset of the methods is meaningful on each.
pub struct NodeService {
    actor: Actor,
}

impl NodeService {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }
}

fn internal(err: Error) -> Status {
    Status::internal(err.to_string())
}

#[tonic::async_trait]
impl NodeActorRpc for NodeService {
    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        let addr = request.into_inner().addr;
        let wait = self
            .actor
            .run(move |node| {
                info!("worker connected from {}", addr);
                node.workers.insert(addr);
                node.phase == Phase::Wait
            })
            .await
            .map_err(internal)?;
        Ok(Response::new(PingReply { wait }))
    }

    async fn signal(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.actor
            .run(|node| node.push_done(JobDone::default()))
            .await
            .map_err(internal)?;
        Ok(Response::new(Empty {}))
    }

    async fn request_job(&self, _request: Request<JobRequest>) -> Result<Response<Job>, Status> {
        let job = self
            .actor
            .run(|node| node.next_job())
            .await
            .map_err(internal)?;
        Ok(Response::new(job))
    }

    async fn finish_job(&self, request: Request<JobDone>) -> Result<Response<Empty>, Status> {
        let done = request.into_inner();
        self.actor
            .run(move |node| node.push_done(done))
            .await
            .map_err(internal)?;
        Ok(Response::new(Empty {}))
    }
}

/////////////////////////////////////////////////////////////////////////////
// Client helpers
/////////////////////////////////////////////////////////////////////////////

/// Dial a peer's RPC endpoint.
pub async fn connect(addr: &str) -> Result<NodeActorClient<Channel>> {
    Ok(NodeActorClient::connect(format!("http://{addr}")).await?)
}

/// Send a bare `Signal` to the node at `addr`.
pub async fn signal(addr: &str) -> Result<()> {
    let mut client = connect(addr).await?;
    client.signal(Empty {}).await?;
    Ok(())
}
