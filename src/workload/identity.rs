//! The identity workload: every input pair passes through unchanged.
//!
//! Useful for checking that a job is lossless end to end: the merged
//! output must equal the input as a multiset of pairs.

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::Pair;

pub async fn map(key: String, value: String, out: mpsc::Sender<Pair>) -> Result<()> {
    out.send(Pair::new(key, value))
        .await
        .context("emitting pair")?;
    Ok(())
}

pub async fn reduce(
    key: String,
    mut values: mpsc::Receiver<String>,
    out: mpsc::Sender<Pair>,
) -> Result<()> {
    while let Some(value) = values.recv().await {
        out.send(Pair::new(key.clone(), value))
            .await
            .context("emitting pair")?;
    }
    Ok(())
}
