//! End-to-end jobs on an in-process cluster: one coordinator and a
//! couple of workers, all on loopback ports, talking over the real
//! RPC and file-service endpoints.

use std::path::{Path, PathBuf};

use mrdb::coordinator::{self, Coordinator};
use mrdb::error::Error;
use mrdb::store::PairStore;
use mrdb::worker::{self, Worker};
use mrdb::{partition, standalone, workload, Pair, Workload};

fn build_store(path: &Path, pairs: &[(String, String)]) {
    let mut store = PairStore::create(path).unwrap();
    for (key, value) in pairs {
        store.append(key, value).unwrap();
    }
}

fn read_store(path: &Path) -> Vec<(String, String)> {
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

/// Run a full job over `pairs` with `n_workers` workers and return the
/// merged output rows.
async fn run_job(
    dir: &Path,
    pairs: &[(String, String)],
    m: u32,
    r: u32,
    workload: Workload,
    n_workers: usize,
) -> Vec<(String, String)> {
    let input = dir.join("input.db");
    let output = dir.join("output.db");
    build_store(&input, pairs);

    let coordinator = Coordinator::bind(coordinator::Config {
        port: 0,
        wait: false,
        tempdir: dir.join("master"),
        m,
        r,
        input,
        output: output.clone(),
    })
    .await
    .unwrap();
    let master_addr = coordinator.host().to_string();
    let coordinator = tokio::spawn(coordinator.run());

    let mut workers = Vec::new();
    for i in 0..n_workers {
        let worker = Worker::bind(worker::Config {
            port: 0,
            master_addr: master_addr.clone(),
            tempdir: dir.join(format!("worker{i}")),
        })
        .await
        .unwrap();
        workers.push(tokio::spawn(worker.run(workload)));
    }

    coordinator.await.unwrap().unwrap();
    for worker in workers {
        worker.await.unwrap().unwrap();
    }

    read_store(&output)
}

fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
    raw.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn word_count_over_two_workers() {
    let dir = tempfile::tempdir().unwrap();
    let input = pairs(&[("doc1", "a a b"), ("doc2", "b c")]);

    let mut rows = run_job(
        dir.path(),
        &input,
        2,
        2,
        workload::named("wc").unwrap(),
        2,
    )
    .await;
    rows.sort();

    assert_eq!(
        rows,
        pairs(&[("a", "2"), ("b", "2"), ("c", "1")])
    );
}

#[tokio::test]
async fn identity_job_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let input: Vec<(String, String)> = (0..1000)
        .map(|i| (format!("key{:03}", i % 357), format!("val{i:04}")))
        .collect();

    let rows = run_job(
        dir.path(),
        &input,
        10,
        4,
        workload::named("identity").unwrap(),
        2,
    )
    .await;

    // Output equals input as a multiset of pairs.
    let mut got = rows;
    got.sort();
    let mut want = input;
    want.sort();
    assert_eq!(got, want);
}

#[tokio::test]
async fn single_key_reduces_in_one_partition() {
    let dir = tempfile::tempdir().unwrap();
    let input: Vec<(String, String)> = (0..100)
        .map(|i| ("k".to_string(), format!("v{i:02}")))
        .collect();

    // Concatenate the values streamed for each key.
    let concat = Workload {
        map_fn: |key, value, out| {
            Box::pin(async move {
                out.send(Pair::new(key, value)).await?;
                Ok(())
            })
        },
        reduce_fn: |key, mut values, out| {
            Box::pin(async move {
                let mut joined = String::new();
                while let Some(value) = values.recv().await {
                    joined.push_str(&value);
                }
                out.send(Pair::new(key, joined)).await?;
                Ok(())
            })
        },
    };

    let rows = run_job(dir.path(), &input, 5, 3, concat, 2).await;

    // All values routed through partition `partition("k", 3)` and came
    // out as one pair, ordered by (key, value).
    assert!(partition("k", 3) < 3);
    let want: String = (0..100).map(|i| format!("v{i:02}")).collect();
    assert_eq!(rows, vec![("k".to_string(), want)]);
}

#[tokio::test]
async fn too_few_rows_abort_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.db");
    build_store(&input, &pairs(&[("a", "1"), ("b", "2"), ("c", "3")]));

    let coordinator = Coordinator::bind(coordinator::Config {
        port: 0,
        wait: false,
        tempdir: dir.path().join("master"),
        m: 5,
        r: 2,
        input,
        output: dir.path().join("output.db"),
    })
    .await
    .unwrap();

    let err = coordinator.run().await.unwrap_err();
    assert!(matches!(err, Error::TooFewKeys { rows: 3, m: 5 }));
    assert!(!dir.path().join("output.db").exists());
}

#[tokio::test]
async fn standalone_matches_the_cluster_result() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.db");
    let output = dir.path().join("output.db");
    build_store(&input, &pairs(&[("doc1", "a a b"), ("doc2", "b c")]));

    standalone::run(
        standalone::Config {
            port: 0,
            tempdir: dir.path().join("scratch"),
            m: 2,
            r: 2,
            input,
            output: output.clone(),
        },
        workload::named("wc").unwrap(),
    )
    .await
    .unwrap();

    let mut rows = read_store(&output);
    rows.sort();
    assert_eq!(
        rows,
        pairs(&[("a", "2"), ("b", "2"), ("c", "1")])
    );
}
