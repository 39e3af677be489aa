//! A MapReduce-compatible implementation of word count.

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::Pair;

/// Emits `(word, "1")` for every alphabetic run in the value.
pub async fn map(_key: String, value: String, out: mpsc::Sender<Pair>) -> Result<()> {
    let words = value
        .split(|c: char| !c.is_alphabetic())
        .filter(|s| !s.is_empty())
        .map(|word| word.to_lowercase());

    for word in words {
        out.send(Pair::new(word, "1"))
            .await
            .context("emitting word")?;
    }
    Ok(())
}

/// Sums the counts streamed for one word.
pub async fn reduce(
    key: String,
    mut values: mpsc::Receiver<String>,
    out: mpsc::Sender<Pair>,
) -> Result<()> {
    let mut count: u64 = 0;
    while let Some(value) = values.recv().await {
        count += value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("bad count for `{key}`"))?;
    }

    out.send(Pair::new(key, count.to_string()))
        .await
        .context("emitting count")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn map_splits_and_lowercases() {
        let (tx, mut rx) = mpsc::channel(16);
        map("doc".into(), "It's a test".into(), tx).await.unwrap();

        let mut words = Vec::new();
        while let Some(pair) = rx.recv().await {
            assert_eq!(pair.value, "1");
            words.push(pair.key);
        }
        assert_eq!(words, vec!["it", "s", "a", "test"]);
    }

    #[tokio::test]
    async fn reduce_sums_counts() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        for _ in 0..3 {
            in_tx.send("1".into()).await.unwrap();
        }
        drop(in_tx);

        reduce("test".into(), in_rx, out_tx).await.unwrap();
        let pair = out_rx.recv().await.unwrap();
        assert_eq!((pair.key.as_str(), pair.value.as_str()), ("test", "3"));
        assert!(out_rx.recv().await.is_none());
    }
}
