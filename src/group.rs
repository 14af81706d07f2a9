use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;

/// Group given to channels no rule matches
pub const FALLBACK_GROUP: &str = "地方/其他";

pub struct GroupRule {
    pub group: &'static str,
    pattern: Regex,
}

impl GroupRule {
    fn new(group: &'static str, pattern: &str) -> Self {
        Self {
            group,
            pattern: Regex::new(pattern).unwrap(),
        }
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }
}

/// Ordered classification table, first match wins.
/// The order also decides how groups are laid out in the written playlist.
pub static GROUP_RULES: LazyLock<Vec<GroupRule>> = LazyLock::new(|| {
    vec![
        GroupRule::new("央视频道", r"(?i)CCTV"),
        GroupRule::new("卫视频道", r"卫视"),
        GroupRule::new("超高清频道", r"4K|8K|超高清"),
        GroupRule::new("数字频道", r"数字|电影|剧场"),
    ]
});

/// How channels get their display group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Grouping {
    /// Classify by keywords found in the channel name
    #[default]
    Keywords,
    /// Keep the `group-title` given by the source playlist
    Source,
}

impl Grouping {
    #[must_use]
    pub fn assign(self, name: &str, source_group: Option<&str>) -> String {
        match self {
            Self::Keywords => classify(name).to_string(),
            Self::Source => source_group
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .unwrap_or(FALLBACK_GROUP)
                .to_string(),
        }
    }
}

/// Classifies a channel into a display group by its name
#[must_use]
pub fn classify(name: &str) -> &'static str {
    GROUP_RULES
        .iter()
        .find(|rule| rule.matches(name))
        .map_or(FALLBACK_GROUP, |rule| rule.group)
}

/// Sort rank of a group: position in [`GROUP_RULES`], every other group ranks after them
#[must_use]
pub fn group_rank(group: &str) -> usize {
    GROUP_RULES
        .iter()
        .position(|rule| rule.group == group)
        .unwrap_or(GROUP_RULES.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cctv_is_case_insensitive() {
        assert_eq!(classify("CCTV-1 综合"), "央视频道");
        assert_eq!(classify("cctv5+"), "央视频道");
    }

    #[test]
    fn satellite_channels() {
        assert_eq!(classify("湖南卫视"), "卫视频道");
    }

    #[test]
    fn first_rule_wins() {
        // Matches both the CCTV and the UHD rule
        assert_eq!(classify("CCTV-4K"), "央视频道");
        // Matches both the satellite and the UHD rule
        assert_eq!(classify("北京卫视4K"), "卫视频道");
    }

    #[test]
    fn uhd_and_digital_channels() {
        assert_eq!(classify("欢笑剧场 8K"), "超高清频道");
        assert_eq!(classify("爱上超高清"), "超高清频道");
        assert_eq!(classify("CHC家庭影院电影"), "数字频道");
        assert_eq!(classify("数字电视"), "数字频道");
    }

    #[test]
    fn uhd_keyword_is_case_sensitive() {
        assert_eq!(classify("some 4k channel"), FALLBACK_GROUP);
    }

    #[test]
    fn unknown_goes_to_fallback() {
        assert_eq!(classify("广州综合"), FALLBACK_GROUP);
        assert_eq!(classify(""), FALLBACK_GROUP);
    }

    #[test]
    fn source_grouping_keeps_group_title() {
        assert_eq!(Grouping::Source.assign("CCTV1", Some("News")), "News");
        assert_eq!(Grouping::Source.assign("CCTV1", Some("  ")), FALLBACK_GROUP);
        assert_eq!(Grouping::Source.assign("CCTV1", None), FALLBACK_GROUP);
        assert_eq!(Grouping::Keywords.assign("CCTV1", Some("News")), "央视频道");
    }

    #[test]
    fn ranks_follow_rule_order() {
        assert!(group_rank("央视频道") < group_rank("卫视频道"));
        assert!(group_rank("数字频道") < group_rank(FALLBACK_GROUP));
        assert_eq!(group_rank("News"), group_rank(FALLBACK_GROUP));
    }
}
