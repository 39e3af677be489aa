//! Fetching shards from peers and merging them into one store.

use std::path::Path;

use tokio::task;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::PairStore;

/// Download `url` into `dest`, replacing any existing file.
pub async fn download(url: &str, dest: &Path) -> Result<()> {
    let fetch_err = |reason: String| Error::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = reqwest::get(url)
        .await
        .map_err(|e| fetch_err(e.to_string()))?
        .error_for_status()
        .map_err(|e| fetch_err(e.to_string()))?;

    let want = response.content_length();
    let body = response
        .bytes()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;
    if let Some(want) = want {
        if body.len() as u64 != want {
            return Err(fetch_err(format!(
                "short body: got {} of {} bytes",
                body.len(),
                want
            )));
        }
    }

    tokio::fs::write(dest, &body).await?;
    debug!("downloaded {} ({} bytes)", url, body.len());
    Ok(())
}

/// Fetch every URL in order and concatenate the rows into a store at
/// `dest`, using `scratch` as the temporary download path. The
/// destination is created (truncating any existing file) before the
/// first fetch; on failure the partial destination is left on disk
/// for inspection, but the caller treats the job as aborted.
pub async fn merge_stores(urls: &[String], dest: &Path, scratch: &Path) -> Result<PairStore> {
    let dest_path = dest.to_path_buf();
    let mut out = task::spawn_blocking(move || PairStore::create(&dest_path)).await??;

    for url in urls {
        download(url, scratch).await?;

        let scratch_path = scratch.to_path_buf();
        out = task::spawn_blocking(move || -> Result<PairStore> {
            let part = PairStore::open(&scratch_path)?;
            out.bulk_append(&part)?;
            Ok(out)
        })
        .await?
        .map_err(|e| Error::Merge {
            url: url.clone(),
            dest: dest.to_path_buf(),
            source: Box::new(e),
        })?;

        tokio::fs::remove_file(scratch).await?;
    }

    Ok(out)
}
