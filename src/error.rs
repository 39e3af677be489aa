//! Error kinds for the engine.
//!
//! Within a task, any error aborts the task and propagates up to the
//! worker loop, which returns fatally. There is no retry: a crashed
//! task aborts the whole job.

use std::path::PathBuf;

/// Everything that can go wrong while splitting, shuffling, mapping,
/// reducing or merging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input store has fewer rows than requested map tasks.
    #[error("fewer keys than map tasks ({rows} rows, {m} tasks)")]
    TooFewKeys { rows: u64, m: u32 },

    /// A SQLite operation on a pair store failed.
    #[error("pair store: {0}")]
    Store(#[from] rusqlite::Error),

    /// A local filesystem operation failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// An HTTP GET of a shard failed or returned a short body.
    #[error("fetching {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A downloaded shard could not be appended to the destination store.
    #[error("merging {url} into {dest}: {source}")]
    Merge {
        url: String,
        dest: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// An RPC call failed.
    #[error("rpc: {0}")]
    Rpc(#[from] tonic::Status),

    /// Dialing a peer's RPC endpoint failed.
    #[error("rpc connect: {0}")]
    Connect(#[from] tonic::transport::Error),

    /// The user map function returned an error.
    #[error("map function: {0}")]
    ClientMap(#[source] anyhow::Error),

    /// The user reduce function returned an error.
    #[error("reduce function: {0}")]
    ClientReduce(#[source] anyhow::Error),

    /// A malformed job envelope: the task body does not match the phase.
    #[error("protocol: {0}")]
    Protocol(String),

    /// The node's state actor has stopped processing events.
    #[error("node actor stopped")]
    ActorStopped,

    /// The consuming end of a pipeline channel hung up early. Internal;
    /// the consumer's own error is the one reported.
    #[error("pipeline consumer hung up")]
    Canceled,

    /// A blocking storage task panicked.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
