use std::{
    collections::HashSet,
    fmt::Write as _,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::group::Grouping;

/// Name given to entries whose `#EXTINF` line carries no title
pub const UNKNOWN_CHANNEL: &str = "未知频道";

static ATTRIBUTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z0-9_]+(?:-[A-Za-z0-9_]+)*)="([^"]*)""#).unwrap());

/// A channel as listed by one source playlist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub name: String,
    pub url: String,
    pub group_title: Option<String>,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,
    pub tvg_logo: Option<String>,
}

/// A deduplicated channel with its display group and, once probed, its latency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub url: String,
    pub group: String,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,
    pub tvg_logo: Option<String>,
    pub latency: Option<Duration>,
}

/// Splits the body of an `#EXTINF` line into its attribute header and the title.
/// The title starts after the first comma outside of a quoted attribute value.
fn split_extinf(line: &str) -> (&str, Option<&str>) {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return (&line[..i], Some(&line[i + 1..])),
            _ => {}
        }
    }

    (line, None)
}

/// Parses a single playlist.
///
/// The name of the last `#EXTINF` line applies to every following `http` line until the next
/// `#EXTINF`. Stream URLs seen before any `#EXTINF` are skipped.
#[must_use]
pub fn parse_playlist(text: &str) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    let mut current: Option<PlaylistEntry> = None;

    for line in text.lines() {
        let line = line.trim();

        if line.starts_with("#EXTINF") {
            let (header, title) = split_extinf(line);
            let name = title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(UNKNOWN_CHANNEL);

            let mut entry = PlaylistEntry {
                name: name.to_string(),
                ..Default::default()
            };
            for caps in ATTRIBUTE_REGEX.captures_iter(header) {
                let value = caps[2].trim();
                if value.is_empty() {
                    continue;
                }
                match &caps[1] {
                    "group-title" => entry.group_title = Some(value.to_string()),
                    "tvg-id" => entry.tvg_id = Some(value.to_string()),
                    "tvg-name" => entry.tvg_name = Some(value.to_string()),
                    "tvg-logo" => entry.tvg_logo = Some(value.to_string()),
                    _ => {}
                }
            }
            current = Some(entry);
        } else if line.starts_with("http") {
            if let Some(template) = &current {
                entries.push(PlaylistEntry {
                    url: line.to_string(),
                    ..template.clone()
                });
            }
        }
    }

    entries
}

/// Collects entries from every source, dropping repeated stream URLs. First occurrence wins.
#[derive(Debug, Default)]
pub struct ChannelCollector {
    grouping: Grouping,
    seen_urls: HashSet<String>,
    channels: Vec<Channel>,
    duplicates: usize,
}

impl ChannelCollector {
    #[must_use]
    pub fn new(grouping: Grouping) -> Self {
        Self {
            grouping,
            ..Default::default()
        }
    }

    /// Adds the entries of one source, returns how many new channels were kept
    pub fn extend(&mut self, entries: impl IntoIterator<Item = PlaylistEntry>) -> usize {
        let before = self.channels.len();
        for entry in entries {
            if !self.seen_urls.insert(entry.url.clone()) {
                debug!("Skipping duplicate stream {}", entry.url);
                self.duplicates += 1;
                continue;
            }

            let group = self
                .grouping
                .assign(&entry.name, entry.group_title.as_deref());
            self.channels.push(Channel {
                name: entry.name,
                url: entry.url,
                group,
                tvg_id: entry.tvg_id,
                tvg_name: entry.tvg_name,
                tvg_logo: entry.tvg_logo,
                latency: None,
            });
        }

        self.channels.len() - before
    }

    #[must_use]
    pub const fn duplicates(&self) -> usize {
        self.duplicates
    }

    #[must_use]
    pub fn into_channels(self) -> Vec<Channel> {
        self.channels
    }
}

/// Attribute values cannot carry a double quote, swap them out
fn attribute_value(value: &str) -> String {
    value.replace('"', "'")
}

/// Serializes channels into an extended M3U playlist
#[must_use]
pub fn render_playlist(channels: &[Channel], epg_url: Option<&str>) -> String {
    let mut out = String::new();
    match epg_url {
        Some(url) => {
            let _ = writeln!(out, "#EXTM3U x-tvg-url=\"{}\"", attribute_value(url));
        }
        None => out.push_str("#EXTM3U\n"),
    }

    for channel in channels {
        out.push_str("#EXTINF:-1");
        for (key, value) in [
            ("tvg-id", &channel.tvg_id),
            ("tvg-name", &channel.tvg_name),
            ("tvg-logo", &channel.tvg_logo),
        ] {
            if let Some(value) = value {
                let _ = write!(out, " {key}=\"{}\"", attribute_value(value));
            }
        }
        let _ = writeln!(
            out,
            " group-title=\"{}\",{}",
            attribute_value(&channel.group),
            channel.name
        );
        out.push_str(&channel.url);
        out.push('\n');
    }

    out
}

/// `<path>.part`, used as a staging file before an atomic rename
pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Writes the playlist next to the target first, then renames it into place so a failed run
/// never leaves a half written playlist behind
///
/// # Errors
/// Errors when the file cannot be written or renamed
pub async fn write_playlist(path: &Path, contents: &str) -> Result<()> {
    let part = part_path(path);
    tokio::fs::write(&part, contents)
        .await
        .with_context(|| format!("Writing playlist to {}", part.display()))?;
    tokio::fs::rename(&part, path)
        .await
        .with_context(|| format!("Moving playlist into {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn channel(name: &str, url: &str, group: &str) -> Channel {
        Channel {
            name: name.to_string(),
            url: url.to_string(),
            group: group.to_string(),
            tvg_id: None,
            tvg_name: None,
            tvg_logo: None,
            latency: None,
        }
    }

    #[test]
    fn parses_extinf_and_url_pairs() {
        let entries = parse_playlist(indoc! {r#"
            #EXTM3U x-tvg-url="http://epg.example/e.xml"
            #EXTINF:-1 tvg-id="CCTV1" tvg-name="CCTV1综合" tvg-logo="http://logo/cctv1.png" group-title="央视",CCTV-1 综合
            http://example.com/cctv1.m3u8
            #EXTINF:-1,湖南卫视
            https://example.com/hunan.m3u8
        "#});

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "CCTV-1 综合");
        assert_eq!(entries[0].url, "http://example.com/cctv1.m3u8");
        assert_eq!(entries[0].tvg_id.as_deref(), Some("CCTV1"));
        assert_eq!(entries[0].tvg_name.as_deref(), Some("CCTV1综合"));
        assert_eq!(entries[0].tvg_logo.as_deref(), Some("http://logo/cctv1.png"));
        assert_eq!(entries[0].group_title.as_deref(), Some("央视"));
        assert_eq!(entries[1].name, "湖南卫视");
        assert_eq!(entries[1].url, "https://example.com/hunan.m3u8");
        assert_eq!(entries[1].group_title, None);
    }

    #[test]
    fn comma_inside_attribute_does_not_split_title() {
        let entries = parse_playlist(
            "#EXTINF:-1 group-title=\"News, Live\",BBC World\nhttp://example.com/bbc\n",
        );
        assert_eq!(entries[0].name, "BBC World");
        assert_eq!(entries[0].group_title.as_deref(), Some("News, Live"));
    }

    #[test]
    fn title_keeps_later_commas() {
        let entries = parse_playlist("#EXTINF:-1,Movies, Action\nhttp://example.com/a\n");
        assert_eq!(entries[0].name, "Movies, Action");
    }

    #[test]
    fn missing_title_becomes_unknown() {
        let entries = parse_playlist(
            "#EXTINF:-1 tvg-id=\"x\"\nhttp://example.com/a\n#EXTINF:-1,   \nhttp://example.com/b\n",
        );
        assert_eq!(entries[0].name, UNKNOWN_CHANNEL);
        assert_eq!(entries[1].name, UNKNOWN_CHANNEL);
    }

    #[test]
    fn name_carries_over_to_following_urls() {
        let entries = parse_playlist(indoc! {"
            #EXTINF:-1,CCTV-5
            http://a.example/cctv5
            http://b.example/cctv5
        "});
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.name == "CCTV-5"));
    }

    #[test]
    fn ignores_urls_before_first_extinf_and_non_http_lines() {
        let entries = parse_playlist(indoc! {"
            #EXTM3U
            http://orphan.example/stream
            #EXTINF:-1,Local
            #EXTVLCOPT:http-user-agent=foo
            rtmp://example.com/live
            udp://@239.0.0.1:1234
            http://example.com/local
        "});
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "http://example.com/local");
    }

    #[test]
    fn handles_crlf_line_endings() {
        let entries = parse_playlist("#EXTM3U\r\n#EXTINF:-1,CCTV-2\r\nhttp://example.com/2\r\n");
        assert_eq!(entries[0].name, "CCTV-2");
        assert_eq!(entries[0].url, "http://example.com/2");
    }

    #[test]
    fn collector_drops_duplicate_urls_keeping_first() {
        let mut collector = ChannelCollector::new(Grouping::Keywords);
        let first = parse_playlist("#EXTINF:-1,CCTV-1\nhttp://example.com/1\n");
        let second = parse_playlist(
            "#EXTINF:-1,CCTV1 HD\nhttp://example.com/1\n#EXTINF:-1,湖南卫视\nhttp://example.com/2\n",
        );

        assert_eq!(collector.extend(first), 1);
        assert_eq!(collector.extend(second), 1);
        assert_eq!(collector.duplicates(), 1);

        let channels = collector.into_channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "CCTV-1");
        assert_eq!(channels[0].group, "央视频道");
        assert_eq!(channels[1].group, "卫视频道");
    }

    #[test]
    fn collector_with_source_grouping() {
        let mut collector = ChannelCollector::new(Grouping::Source);
        collector.extend(parse_playlist(
            "#EXTINF:-1 group-title=\"Sports\",CCTV-5\nhttp://example.com/5\n",
        ));
        assert_eq!(collector.into_channels()[0].group, "Sports");
    }

    #[test]
    fn renders_header_and_entries() {
        let mut cctv = channel("CCTV-1", "http://example.com/1", "央视频道");
        cctv.tvg_id = Some("CCTV1".to_string());
        cctv.tvg_name = Some("CCTV1综合".to_string());
        cctv.tvg_logo = Some("http://logo/1.png".to_string());
        let channels = [cctv, channel("湖南卫视", "http://example.com/2", "卫视频道")];

        let rendered = render_playlist(&channels, Some("http://epg.51zmt.top:8000/e.xml"));
        assert_eq!(
            rendered,
            indoc! {r#"
                #EXTM3U x-tvg-url="http://epg.51zmt.top:8000/e.xml"
                #EXTINF:-1 tvg-id="CCTV1" tvg-name="CCTV1综合" tvg-logo="http://logo/1.png" group-title="央视频道",CCTV-1
                http://example.com/1
                #EXTINF:-1 group-title="卫视频道",湖南卫视
                http://example.com/2
            "#}
        );
    }

    #[test]
    fn quotes_in_attribute_values_are_replaced() {
        let mut channel = channel("Say \"hi\"", "http://example.com/hi", "Talk");
        channel.tvg_name = Some("Say \"hi\"".to_string());
        let rendered = render_playlist(&[channel], None);
        assert!(rendered.contains(r#"tvg-name="Say 'hi'" group-title="Talk",Say "hi""#));
    }

    #[test]
    fn renders_plain_header_without_epg() {
        assert_eq!(render_playlist(&[], None), "#EXTM3U\n");
    }

    #[tokio::test]
    async fn writes_playlist_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live_all.m3u");
        tokio::fs::write(&path, "old").await.unwrap();

        write_playlist(&path, "#EXTM3U\n").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "#EXTM3U\n");
        assert!(!part_path(&path).exists());
    }
}
