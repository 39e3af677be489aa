//! The map executor.
//!
//! A map task downloads its source shard, runs the workload's map
//! function over every input pair, and partitions the emitted pairs
//! into R intermediate shards by key hash. The shards stay on local
//! disk; peers pull them through the file service during the reduce
//! phase.

use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::info;

use crate::error::{Error, Result};
use crate::fetch::download;
use crate::pb::MapTask;
use crate::serve::make_url;
use crate::store::PairStore;
use crate::{partition, Pair, Workload, MAP_OUT_CAPACITY, SCAN_CAPACITY};

impl MapTask {
    pub(crate) fn source_file(&self) -> String {
        format!("map_{}_source.db", self.n)
    }

    pub(crate) fn input_file(&self) -> String {
        format!("map_{}_input.db", self.n)
    }

    pub(crate) fn output_file(&self, reduce: u32) -> String {
        format!("map_{}_output_{}.db", self.n, reduce)
    }

    /// Run this map task against `tempdir`.
    ///
    /// The map function runs concurrently with a writer that drains
    /// its output stream into the partitioned shards; the bounded
    /// stream stalls a chatty map function instead of buffering a
    /// whole row's output in memory. Producer and writer are joined
    /// after every input row.
    pub async fn process(&self, tempdir: &Path, workload: &Workload) -> Result<()> {
        let input_path = tempdir.join(self.input_file());
        download(&make_url(&self.source_host, &self.source_file()), &input_path).await?;

        // R empty output shards, handed back and forth to the writer.
        let task = self.clone();
        let dir = tempdir.to_path_buf();
        let mut outputs = task::spawn_blocking(move || -> Result<Vec<PairStore>> {
            (0..task.r)
                .map(|i| PairStore::create(&dir.join(task.output_file(i))))
                .collect()
        })
        .await??;

        // Feed input rows off the blocking scan.
        let (row_tx, mut row_rx) = mpsc::channel::<Pair>(SCAN_CAPACITY);
        let feeder = task::spawn_blocking(move || -> Result<u64> {
            let input = PairStore::open(&input_path)?;
            let mut rows = 0u64;
            let scanned = input.scan(|key, value| {
                rows += 1;
                row_tx
                    .blocking_send(Pair::new(key, value))
                    .map_err(|_| Error::Canceled)
            });
            match scanned {
                // The executor hung up early; its error is the one
                // that matters.
                Ok(()) | Err(Error::Canceled) => Ok(rows),
                Err(e) => Err(e),
            }
        });

        let mut in_count = 0u64;
        let mut out_count = 0u64;
        while let Some(pair) = row_rx.recv().await {
            in_count += 1;

            let (out_tx, out_rx) = mpsc::channel::<Pair>(MAP_OUT_CAPACITY);
            let writer = write_partitioned(outputs, out_rx, self.r);

            let emitted = (workload.map_fn)(pair.key, pair.value, out_tx).await;
            // The map function dropped its sender on return, so the
            // writer always terminates. A dead writer shows up inside
            // the map function as a send failure; the writer's own
            // error is the one worth reporting.
            match (emitted, writer.await?) {
                (Ok(()), Ok((stores, written))) => {
                    outputs = stores;
                    out_count += written;
                }
                (_, Err(write_err)) => return Err(write_err),
                (Err(client_err), Ok(_)) => return Err(Error::ClientMap(client_err)),
            }
        }
        let scanned = feeder.await??;
        debug_assert_eq!(scanned, in_count);

        info!(
            "map task {} processed {} pairs, generated {} pairs across {} shards",
            self.n, in_count, out_count, self.r
        );
        Ok(())
    }
}

/// Drain `rx` into the shard each pair's key hashes to. Returns the
/// stores along with how many pairs were written.
fn write_partitioned(
    mut outputs: Vec<PairStore>,
    mut rx: mpsc::Receiver<Pair>,
    n_reduce: u32,
) -> JoinHandle<Result<(Vec<PairStore>, u64)>> {
    task::spawn_blocking(move || {
        let mut written = 0u64;
        while let Some(pair) = rx.blocking_recv() {
            let slot = partition(&pair.key, n_reduce) as usize;
            outputs[slot].append(&pair.key, &pair.value)?;
            written += 1;
        }
        Ok((outputs, written))
    })
}
