use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail, ensure};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::{select, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{playlist::Channel, util::truncate_string};

#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Time allowed for each request
    pub timeout: Duration,
    /// Maximum amount of checks running at the same time
    pub parallelism: usize,
}

/// Outcome of checking every channel
#[derive(Debug, Default)]
pub struct ProbeSummary {
    /// Reachable channels with their latency filled in, in input order
    pub alive: Vec<Channel>,
    pub dead: usize,
}

/// Checks whether a stream answers with a success status.
///
/// Tries `HEAD` first. Servers that refuse or fail it get a second chance with a `GET` whose body
/// is never read. Returns the time until the response headers of the successful request arrived.
///
/// # Errors
/// Errors when neither request succeeds within `timeout`
#[instrument(skip(client), level = "debug")]
pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<Duration> {
    let started = Instant::now();
    match client.head(url).timeout(timeout).send().await {
        Ok(res) if res.status().is_success() => return Ok(started.elapsed()),
        Ok(res) => debug!("HEAD responded with {}, retrying with GET", res.status()),
        Err(e) => debug!("HEAD failed ({e}), retrying with GET"),
    }

    let started = Instant::now();
    let res = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .context("Probing stream")?;
    ensure!(
        res.status().is_success(),
        "Stream responded with {}",
        res.status()
    );

    Ok(started.elapsed())
}

/// Probes every channel with at most `options.parallelism` checks in flight.
///
/// # Errors
/// Errors when cancelled through `ct` before every check finished
pub async fn probe_all(
    client: &reqwest::Client,
    channels: Vec<Channel>,
    options: ProbeOptions,
    ct: CancellationToken,
) -> Result<ProbeSummary> {
    let total = channels.len();
    let permits = Arc::new(Semaphore::new(
        options.parallelism.clamp(1, Semaphore::MAX_PERMITS),
    ));
    let mut tasks = JoinSet::new();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .context("Building progress bar style")?,
    );

    for (index, mut channel) in channels.into_iter().enumerate() {
        let ct = ct.clone();
        let permits = permits.clone();
        let client = client.clone();
        let timeout = options.timeout;

        tasks.spawn(async move {
            let _permit = select! {
                () = ct.cancelled() => return None,
                p = permits.acquire_owned() => p.ok()?,
            };

            let outcome = select! {
                () = ct.cancelled() => return None,
                r = probe(&client, &channel.url, timeout) => r,
            };
            match outcome {
                Ok(latency) => {
                    debug!("{} is alive ({}ms)", channel.name, latency.as_millis());
                    channel.latency = Some(latency);
                }
                Err(e) => debug!("{} is unreachable: {e:#}", channel.name),
            }

            Some((index, channel))
        });
    }

    let mut checked = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        let Some((index, channel)) = joined.context("Joining probe task")? else {
            continue;
        };
        pb.set_message(truncate_string(&channel.name, 32));
        pb.inc(1);
        checked.push((index, channel));
    }
    pb.finish_and_clear();

    if ct.is_cancelled() {
        bail!("Validation was cancelled after {}/{total} checks", checked.len());
    }

    checked.sort_unstable_by_key(|(index, _)| *index);
    let mut summary = ProbeSummary::default();
    for (_, channel) in checked {
        if channel.latency.is_some() {
            summary.alive.push(channel);
        } else {
            summary.dead += 1;
        }
    }
    info!(
        "Validated {total} streams: {} alive, {} unreachable",
        summary.alive.len(),
        summary.dead
    );

    Ok(summary)
}
