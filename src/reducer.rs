//! The reduce executor.
//!
//! A reduce task pulls the M intermediate shards of its partition from
//! the hosts that produced them, merges them into one input store,
//! then walks the merged rows ordered by (key, value). Rows sharing a
//! key are contiguous, so each key becomes one streamed batch: a
//! feeder pushes the key's values into a bounded stream, the
//! workload's reduce function consumes them, and a writer drains its
//! output stream into the task's single output shard.

use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::info;

use crate::error::{Error, Result};
use crate::fetch::merge_stores;
use crate::pb::ReduceTask;
use crate::serve::make_url;
use crate::store::PairStore;
use crate::{Pair, Workload, REDUCE_IN_CAPACITY, REDUCE_OUT_CAPACITY};

/// One key's worth of input: the key and the stream its values arrive
/// on. The stream closing is the only end-of-key signal.
struct KeyBatch {
    key: String,
    values: mpsc::Receiver<String>,
}

impl ReduceTask {
    /// Intermediate shard produced by map task `map_n` for this
    /// partition.
    pub(crate) fn map_output_file(&self, map_n: u32) -> String {
        format!("map_{}_output_{}.db", map_n, self.n)
    }

    pub(crate) fn input_file(&self) -> String {
        format!("reduce_{}_input.db", self.n)
    }

    pub(crate) fn temp_file(&self) -> String {
        format!("reduce_{}_temp.db", self.n)
    }

    pub(crate) fn output_file(&self) -> String {
        format!("reduce_{}_output.db", self.n)
    }

    /// Run this reduce task against `tempdir`.
    pub async fn process(&self, tempdir: &Path, workload: &Workload) -> Result<()> {
        // Merge the M intermediate shards into this task's input store.
        let urls: Vec<String> = (0..self.m)
            .map(|i| make_url(&self.source_hosts[i as usize], &self.map_output_file(i)))
            .collect();
        let input = merge_stores(
            &urls,
            &tempdir.join(self.input_file()),
            &tempdir.join(self.temp_file()),
        )
        .await?;

        let output_path = tempdir.join(self.output_file());
        let mut output = task::spawn_blocking(move || PairStore::create(&output_path)).await??;

        // Feed per-key batches off the ordered scan. The feeder closes
        // a key's value stream when the key changes, and the batch
        // stream itself when rows run out.
        let (batch_tx, mut batch_rx) = mpsc::channel::<KeyBatch>(1);
        let feeder = task::spawn_blocking(move || -> Result<u64> {
            let mut values = 0u64;
            let mut prev: Option<String> = None;
            let mut value_tx: Option<mpsc::Sender<String>> = None;
            let scanned = input.scan_by_key_value(|key, value| {
                if prev.as_deref() != Some(key) {
                    let (tx, rx) = mpsc::channel(REDUCE_IN_CAPACITY);
                    batch_tx
                        .blocking_send(KeyBatch {
                            key: key.to_string(),
                            values: rx,
                        })
                        .map_err(|_| Error::Canceled)?;
                    // Dropping the previous sender closes that key's
                    // stream.
                    value_tx = Some(tx);
                    prev = Some(key.to_string());
                }
                values += 1;
                value_tx
                    .as_ref()
                    .expect("batch sender set on key change")
                    .blocking_send(value.to_string())
                    .map_err(|_| Error::Canceled)
            });
            match scanned {
                // The executor hung up early; its error wins.
                Ok(()) | Err(Error::Canceled) => Ok(values),
                Err(e) => Err(e),
            }
        });

        let mut key_count = 0u64;
        let mut out_count = 0u64;
        while let Some(batch) = batch_rx.recv().await {
            key_count += 1;

            let (out_tx, out_rx) = mpsc::channel::<Pair>(REDUCE_OUT_CAPACITY);
            let writer = write_output(output, out_rx);

            let reduced = (workload.reduce_fn)(batch.key, batch.values, out_tx).await;
            // The reduce function dropped its sender on return, so the
            // writer always terminates; join it before starting the
            // next key. A dead writer shows up inside the reduce
            // function as a send failure; the writer's own error is
            // the one worth reporting.
            match (reduced, writer.await?) {
                (Ok(()), Ok((store, written))) => {
                    output = store;
                    out_count += written;
                }
                (_, Err(write_err)) => return Err(write_err),
                (Err(client_err), Ok(_)) => return Err(Error::ClientReduce(client_err)),
            }
        }
        let val_count = feeder.await??;

        info!(
            "reduce task {} processed {} keys and {} values, generated {} pairs",
            self.n, key_count, val_count, out_count
        );
        Ok(())
    }
}

/// Drain `rx` into the output shard. Returns the store along with how
/// many pairs were written.
fn write_output(
    mut output: PairStore,
    mut rx: mpsc::Receiver<Pair>,
) -> JoinHandle<Result<(PairStore, u64)>> {
    task::spawn_blocking(move || {
        let mut written = 0u64;
        while let Some(pair) = rx.blocking_recv() {
            output.append(&pair.key, &pair.value)?;
            written += 1;
        }
        Ok((output, written))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Actor, Node};
    use crate::serve;
    use crate::workload;

    async fn serve_dir(dir: std::path::PathBuf) -> String {
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        let actor = Actor::spawn(Node::idle(done_tx));
        let listener = tokio::net::TcpListener::bind("localhost:0").await.unwrap();
        let host = format!("localhost:{}", listener.local_addr().unwrap().port());
        tokio::spawn(serve::serve_node(listener, dir, actor));
        host
    }

    fn read_all(path: &Path) -> Vec<(String, String)> {
        let store = PairStore::open(path).unwrap();
        let mut rows = Vec::new();
        store
            .scan(|k, v| {
                rows.push((k.to_string(), v.to_string()));
                Ok(())
            })
            .unwrap();
        rows
    }

    /// Two map tasks' intermediate shards for partition 0, merged and
    /// summed by the word-count reducer.
    #[tokio::test]
    async fn merges_and_groups_by_key() {
        let source_dir = tempfile::tempdir().unwrap();
        let mut shard0 =
            PairStore::create(&source_dir.path().join("map_0_output_0.db")).unwrap();
        shard0.append("a", "1").unwrap();
        shard0.append("b", "1").unwrap();
        shard0.append("a", "1").unwrap();
        let mut shard1 =
            PairStore::create(&source_dir.path().join("map_1_output_0.db")).unwrap();
        shard1.append("b", "1").unwrap();
        shard1.append("c", "1").unwrap();
        drop((shard0, shard1));
        let host = serve_dir(source_dir.path().to_path_buf()).await;

        let work_dir = tempfile::tempdir().unwrap();
        let task = ReduceTask {
            m: 2,
            r: 1,
            n: 0,
            source_hosts: vec![host.clone(), host],
        };
        task.process(work_dir.path(), &workload::named("wc").unwrap())
            .await
            .unwrap();

        let mut rows = read_all(&work_dir.path().join(task.output_file()));
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("a".into(), "2".into()),
                ("b".into(), "2".into()),
                ("c".into(), "1".into()),
            ]
        );
    }

    /// A partition no key hashes to still produces an (empty) output
    /// shard.
    #[tokio::test]
    async fn empty_partition_still_writes_output() {
        let source_dir = tempfile::tempdir().unwrap();
        drop(PairStore::create(&source_dir.path().join("map_0_output_1.db")).unwrap());
        let host = serve_dir(source_dir.path().to_path_buf()).await;

        let work_dir = tempfile::tempdir().unwrap();
        let task = ReduceTask {
            m: 1,
            r: 2,
            n: 1,
            source_hosts: vec![host],
        };
        task.process(work_dir.path(), &workload::named("wc").unwrap())
            .await
            .unwrap();

        let output = PairStore::open(&work_dir.path().join(task.output_file())).unwrap();
        assert_eq!(output.count().unwrap(), 0);
    }

    /// Values for one key arrive in (key, value) order.
    #[tokio::test]
    async fn values_stream_in_scan_order() {
        let source_dir = tempfile::tempdir().unwrap();
        let mut shard =
            PairStore::create(&source_dir.path().join("map_0_output_0.db")).unwrap();
        for v in ["3", "1", "2"] {
            shard.append("k", v).unwrap();
        }
        drop(shard);
        let host = serve_dir(source_dir.path().to_path_buf()).await;

        let concat = Workload {
            map_fn: |_, _, _| Box::pin(async { Ok(()) }),
            reduce_fn: |key, mut values, out| {
                Box::pin(async move {
                    let mut joined = String::new();
                    while let Some(v) = values.recv().await {
                        joined.push_str(&v);
                    }
                    out.send(Pair::new(key, joined)).await?;
                    Ok(())
                })
            },
        };

        let work_dir = tempfile::tempdir().unwrap();
        let task = ReduceTask {
            m: 1,
            r: 1,
            n: 0,
            source_hosts: vec![host],
        };
        task.process(work_dir.path(), &concat).await.unwrap();

        let rows = read_all(&work_dir.path().join(task.output_file()));
        assert_eq!(rows, vec![("k".into(), "123".into())]);
    }
}
