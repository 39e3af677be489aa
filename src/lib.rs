//! A distributed MapReduce engine for key/value pair stores kept in
//! SQLite databases.
//!
//! A single coordinator splits an input store into shards, hands out
//! map and reduce tasks to a dynamic set of workers over gRPC, and
//! merges the final shards into one output store. Workers fetch input
//! shards over HTTP from peer workers, run the workload's map and
//! reduce functions, and serve their own output shards to later
//! stages. Data never passes through the coordinator until the final
//! merge.

use std::fmt;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub mod cmd;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod mapper;
pub mod reducer;
pub mod rpc;
pub mod serve;
pub mod standalone;
pub mod store;
pub mod worker;
pub mod workload;

pub use error::{Error, Result};

/// Generated gRPC contract between coordinator and workers.
pub mod pb {
    tonic::include_proto!("mapreduce");
}

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// A map function takes an input key/value pair and a bounded stream
/// to emit output pairs on. The stream closes when the sender is
/// dropped, which the function does simply by returning.
pub type MapFn =
    fn(key: String, value: String, out: mpsc::Sender<Pair>) -> BoxFuture<'static, anyhow::Result<()>>;

/// A reduce function takes a key, a bounded stream of the values
/// grouped under that key, and a bounded stream to emit output pairs
/// on. The value stream closing is the only signal that the key is
/// exhausted; the function must not return before then, and returning
/// closes the output stream.
pub type ReduceFn = fn(
    key: String,
    values: mpsc::Receiver<String>,
    out: mpsc::Sender<Pair>,
) -> BoxFuture<'static, anyhow::Result<()>>;

/// A MapReduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key/value pair. Keys are not unique within a store.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Pair {
    /// The key.
    pub key: String,
    /// The value.
    pub value: String,
}

impl Pair {
    /// Construct a new pair from the given key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.value)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Partitioning
/////////////////////////////////////////////////////////////////////////////

/// Hashes an intermediate key with 32-bit FNV-1.
///
/// Part of the wire contract: every worker must route a key to the
/// same reduce partition, in every phase, or shards go missing.
pub fn ihash(key: &str) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash = hash.wrapping_mul(PRIME);
        hash ^= u32::from(*byte);
    }
    hash
}

/// Compute the reduce partition for a key: `ihash(key) % n_reduce`.
pub fn partition(key: &str, n_reduce: u32) -> u32 {
    ihash(key) % n_reduce
}

/////////////////////////////////////////////////////////////////////////////
// Pipeline tuning
/////////////////////////////////////////////////////////////////////////////

/// Capacity of the stream a map function emits pairs on.
pub const MAP_OUT_CAPACITY: usize = 200;

/// Capacity of the per-key value stream fed to a reduce function.
pub const REDUCE_IN_CAPACITY: usize = 100;

/// Capacity of the stream a reduce function emits pairs on.
pub const REDUCE_OUT_CAPACITY: usize = 100;

/// Capacity of the channel bridging a blocking store scan into the
/// async pipeline.
pub(crate) const SCAN_CAPACITY: usize = 64;

/// How often a worker polls the coordinator for a job, in milliseconds.
pub const REQUEST_INTERVAL_MS: u64 = 100;
