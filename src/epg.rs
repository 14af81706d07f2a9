use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail, ensure};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_stream::StreamExt;
use tracing::{info, instrument};

use crate::playlist::part_path;

/// Program guide advertised in the playlist header unless told otherwise
pub const DEFAULT_EPG_URL: &str = "http://epg.51zmt.top:8000/e.xml";

/// Downloads the program guide into `path`.
///
/// The document is streamed into `<path>.part` and only renamed into place once complete,
/// an older cache stays untouched when the download fails.
///
/// Returns the amount of bytes written
///
/// # Errors
/// Errors on network error, non-success status, empty document or filesystem error
#[instrument(skip(client))]
pub async fn cache_epg(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    timeout: Duration,
) -> Result<u64> {
    let res = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .context("Fetching program guide")?;
    ensure!(
        res.status().is_success(),
        "Program guide responded with {}",
        res.status()
    );

    let part = part_path(path);
    let written = match stream_to_file(res, &part).await {
        Ok(w) => w,
        Err(e) => {
            tokio::fs::remove_file(&part).await.ok();
            return Err(e);
        }
    };
    if written == 0 {
        tokio::fs::remove_file(&part).await.ok();
        bail!("Program guide is empty");
    }

    tokio::fs::rename(&part, path)
        .await
        .with_context(|| format!("Moving program guide into {}", path.display()))?;
    info!("Cached program guide into {} ({written} bytes)", path.display());

    Ok(written)
}

async fn stream_to_file(res: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = File::create(path)
        .await
        .with_context(|| format!("Creating {}", path.display()))?;
    let mut res_stream = res.bytes_stream();
    let mut written = 0;

    while let Some(data) = res_stream.next().await {
        let data = data.context("Downloading program guide")?;
        file.write_all(&data).await.context("Writing program guide")?;
        written += data.len() as u64;
    }
    file.flush().await.context("Flushing program guide")?;

    Ok(written)
}
