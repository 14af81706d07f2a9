use std::{path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use futures_util::{StreamExt as _, stream};
use tracing::{info, instrument, warn};

/// Publicly maintained playlists fetched when no source is given
pub const DEFAULT_SOURCES: [&str; 4] = [
    "https://raw.githubusercontent.com/hujingguang/ChinaIPTV/main/cnTV_AutoUpdate.m3u8",
    "https://raw.githubusercontent.com/fanmingming/live/main/tv/m3u/ipv6.m3u",
    "https://raw.githubusercontent.com/YueChan/Live/main/IPTV.m3u",
    "https://raw.githubusercontent.com/Guovern/tv-list/main/m3u/chinatv.m3u",
];

/// How many sources are downloaded at the same time
const SOURCE_FETCH_PARALLELISM: usize = 4;

/// Body (or failure) of one source playlist
#[derive(Debug)]
pub struct FetchedSource {
    pub url: String,
    pub body: Result<String>,
}

/// Reads source URLs from a file with one URL per line.
/// Blank lines and lines starting with `#` are skipped.
///
/// # Errors
/// Errors when the file cannot be read
pub async fn read_sources_file(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Reading sources file {}", path.display()))?;

    Ok(parse_source_list(&text))
}

fn parse_source_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// Fetches a single playlist and decodes it as UTF-8 regardless of the announced charset
///
/// # Errors
/// Errors on network error, timeout or non-success status
#[instrument(skip(client))]
pub async fn fetch_source(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<String> {
    let res = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .context("Fetching source playlist")?;
    ensure!(
        res.status().is_success(),
        "Source responded with {}",
        res.status()
    );

    let body = res.bytes().await.context("Downloading source playlist")?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Fetches every source, a few at a time. Results keep the order of `urls`.
/// A failing source is logged and reported, it never aborts the others.
pub async fn fetch_sources(
    client: &reqwest::Client,
    urls: &[String],
    timeout: Duration,
) -> Vec<FetchedSource> {
    stream::iter(urls)
        .map(move |url| async move {
            let body = fetch_source(client, url, timeout).await;
            match &body {
                Ok(text) => info!("Fetched {url} ({} bytes)", text.len()),
                Err(e) => warn!("Unable to fetch {url}: {e:#}"),
            }
            FetchedSource {
                url: url.clone(),
                body,
            }
        })
        .buffered(SOURCE_FETCH_PARALLELISM)
        .collect()
        .await
}
