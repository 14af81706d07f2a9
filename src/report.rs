use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::playlist::Channel;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub url: String,
    /// Entries parsed out of the playlist, duplicates included
    pub entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum EpgReport {
    Disabled,
    /// The run stopped before the playlist was written
    Skipped,
    Advertised { url: String },
    Cached { url: String, path: PathBuf, bytes: u64 },
    Failed { url: String, error: String },
}

/// Summary of a single aggregation run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub unique_channels: usize,
    pub duplicates: usize,
    pub alive: usize,
    pub dead: usize,
    pub groups: BTreeMap<String, usize>,
    pub output: PathBuf,
    /// Whether `output` was replaced by this run
    pub written: bool,
    pub epg: EpgReport,
}

impl RunReport {
    /// Counts channels per display group
    #[must_use]
    pub fn count_groups(channels: &[Channel]) -> BTreeMap<String, usize> {
        let mut groups = BTreeMap::new();
        for channel in channels {
            *groups.entry(channel.group.clone()).or_default() += 1;
        }
        groups
    }

    /// # Errors
    /// Errors when the report cannot be serialized or written
    pub async fn write(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Serializing run report")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Writing run report to {}", path.display()))
    }

    /// Human readable summary for the logs
    #[must_use]
    pub fn summary(&self) -> String {
        let failed_sources = self.sources.iter().filter(|s| s.error.is_some()).count();
        let groups = self
            .groups
            .iter()
            .map(|(group, count)| format!("{group}: {count}"))
            .collect::<Vec<String>>()
            .join(", ");

        indoc::formatdoc!(
            "Sources fetched: {}/{}
            Unique streams: {} ({} duplicates dropped)
            Alive streams: {} ({} unreachable)
            Groups: {}
            Playlist {} {}",
            self.sources.len() - failed_sources,
            self.sources.len(),
            self.unique_channels,
            self.duplicates,
            self.alive,
            self.dead,
            if groups.is_empty() { "none".to_string() } else { groups },
            if self.written { "written to" } else { "left untouched at" },
            self.output.display(),
        )
    }
}
