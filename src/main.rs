#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Parser;
use group::Grouping;
use playlist::{ChannelCollector, parse_playlist, render_playlist, write_playlist};
use probe::{ProbeOptions, probe_all};
use report::{EpgReport, RunReport, SourceReport};
use sort::{SortMode, sort_channels};
use source::{DEFAULT_SOURCES, fetch_sources, read_sources_file};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use util::{init_http_client, spawn_ct_watcher, warn_ulimit};

pub mod epg;
pub mod group;
pub mod playlist;
pub mod probe;
pub mod report;
pub mod sort;
pub mod source;
pub mod util;

/// Aggregates public IPTV playlists into a single playlist of reachable streams
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Playlist URL to aggregate, can be repeated [default: built-in list]
    #[arg(short, long = "source", value_name = "URL")]
    sources: Vec<String>,

    /// File with additional playlist URLs, one per line
    #[arg(long, env = "IPTV_SOURCES_FILE")]
    sources_file: Option<PathBuf>,

    /// Where the consolidated playlist is written
    #[arg(short, long, env = "IPTV_OUTPUT", default_value = "live_all.m3u")]
    output: PathBuf,

    /// Seconds a stream gets to answer before it is considered dead
    #[arg(short, long, env = "IPTV_TIMEOUT", default_value_t = 3)]
    timeout: u64,

    /// Seconds allowed for downloading each source playlist and the program guide
    #[arg(long, env = "IPTV_FETCH_TIMEOUT", default_value_t = 10)]
    fetch_timeout: u64,

    /// The amount of parallel stream checks
    #[arg(short, long, env = "IPTV_PARALLELISM", default_value_t = 50)]
    parallelism: usize,

    /// How channels are assigned to groups
    #[arg(short, long, value_enum, default_value_t = Grouping::Keywords)]
    grouping: Grouping,

    /// Order of channels in the playlist
    #[arg(long, value_enum, default_value_t = SortMode::Group)]
    sort: SortMode,

    /// Program guide advertised in the playlist header
    #[arg(long, env = "IPTV_EPG_URL", default_value = epg::DEFAULT_EPG_URL)]
    epg_url: String,

    /// Do not advertise nor download a program guide
    #[arg(long, conflicts_with = "epg_cache")]
    no_epg: bool,

    /// Also download the program guide into this file
    #[arg(long, env = "IPTV_EPG_CACHE")]
    epg_cache: Option<PathBuf>,

    /// Write a JSON summary of the run into this file
    #[arg(long, env = "IPTV_REPORT")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    warn_ulimit(args.parallelism);

    let client = init_http_client()?;
    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    run(&args, &client, ct).await?;
    info!("All done successfully!");

    Ok(())
}

/// Logs the run summary and writes the JSON report when asked to
async fn publish_report(report: &RunReport, path: Option<&Path>) -> Result<()> {
    info!("{}", report.summary());

    if let Some(path) = path {
        report.write(path).await?;
        info!("Run report written to {}", path.display());
    }

    Ok(())
}

/// Fetch, validate, classify and write the playlist
async fn run(args: &Args, client: &reqwest::Client, ct: CancellationToken) -> Result<RunReport> {
    let mut source_urls = args.sources.clone();
    if let Some(path) = &args.sources_file {
        let listed = read_sources_file(path).await?;
        if listed.is_empty() {
            warn!("{} does not list any source", path.display());
        }
        source_urls.extend(listed);
    }
    if source_urls.is_empty() {
        info!("No source given, using the built-in list");
        source_urls = DEFAULT_SOURCES.map(ToString::to_string).to_vec();
    }

    info!("Fetching {} source playlists", source_urls.len());
    let fetched = select! {
        biased;
        () = ct.cancelled() => bail!("Cancelled while fetching source playlists"),
        f = fetch_sources(client, &source_urls, Duration::from_secs(args.fetch_timeout)) => f,
    };

    let mut collector = ChannelCollector::new(args.grouping);
    let mut sources = Vec::with_capacity(fetched.len());
    for source in fetched {
        match source.body {
            Ok(body) => {
                let entries = parse_playlist(&body);
                let parsed = entries.len();
                let kept = collector.extend(entries);
                info!("{}: {parsed} entries, {kept} new streams", source.url);
                sources.push(SourceReport {
                    url: source.url,
                    entries: parsed,
                    error: None,
                });
            }
            Err(e) => sources.push(SourceReport {
                url: source.url,
                entries: 0,
                error: Some(format!("{e:#}")),
            }),
        }
    }

    if sources.iter().all(|s| s.error.is_some()) {
        let report = RunReport {
            generated_at: Utc::now(),
            sources,
            unique_channels: 0,
            duplicates: 0,
            alive: 0,
            dead: 0,
            groups: RunReport::count_groups(&[]),
            output: args.output.clone(),
            written: false,
            epg: EpgReport::Skipped,
        };
        publish_report(&report, args.report.as_deref()).await?;
        bail!("Every source playlist failed to download, keeping the previous playlist");
    }

    let duplicates = collector.duplicates();
    let channels = collector.into_channels();
    let unique_channels = channels.len();
    info!(
        "Collected {unique_channels} unique streams ({duplicates} duplicates dropped). Validating with {} parallelism",
        args.parallelism
    );

    let probed = probe_all(
        client,
        channels,
        ProbeOptions {
            timeout: Duration::from_secs(args.timeout),
            parallelism: args.parallelism,
        },
        ct.clone(),
    )
    .await?;
    let mut alive = probed.alive;
    sort_channels(&mut alive, args.sort);

    let epg_url = (!args.no_epg).then_some(args.epg_url.as_str());
    write_playlist(&args.output, &render_playlist(&alive, epg_url)).await?;

    let epg = match (epg_url, &args.epg_cache) {
        (None, _) => EpgReport::Disabled,
        (Some(url), None) => EpgReport::Advertised {
            url: url.to_string(),
        },
        (Some(url), Some(path)) => {
            let cached = select! {
                biased;
                () = ct.cancelled() => {
                    tokio::fs::remove_file(playlist::part_path(path)).await.ok();
                    Err(anyhow::anyhow!("Cancelled while downloading"))
                }
                r = epg::cache_epg(client, url, path, Duration::from_secs(args.fetch_timeout)) => r,
            };
            match cached {
                Ok(bytes) => EpgReport::Cached {
                    url: url.to_string(),
                    path: path.clone(),
                    bytes,
                },
                Err(e) => {
                    warn!("Unable to cache program guide: {e:#}");
                    EpgReport::Failed {
                        url: url.to_string(),
                        error: format!("{e:#}"),
                    }
                }
            }
        }
    };

    let report = RunReport {
        generated_at: Utc::now(),
        sources,
        unique_channels,
        duplicates,
        alive: alive.len(),
        dead: probed.dead,
        groups: RunReport::count_groups(&alive),
        output: args.output.clone(),
        written: true,
        epg,
    };
    publish_report(&report, args.report.as_deref()).await?;

    Ok(report)
}
