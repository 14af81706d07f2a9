use std::cmp::Ordering;

use clap::ValueEnum;

use crate::{group::group_rank, playlist::Channel, util::natural_cmp};

/// Order of channels in the written playlist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SortMode {
    /// By display group, then channel name
    #[default]
    Group,
    /// Fastest responding streams first
    Latency,
}

pub fn sort_channels(channels: &mut [Channel], mode: SortMode) {
    match mode {
        SortMode::Group => channels.sort_by(|a, b| {
            group_rank(&a.group)
                .cmp(&group_rank(&b.group))
                .then_with(|| a.group.cmp(&b.group))
                .then_with(|| natural_cmp(&a.name, &b.name))
        }),
        // Unprobed channels go last
        SortMode::Latency => channels.sort_by(|a, b| {
            let by_latency = match (a.latency, b.latency) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_latency.then_with(|| natural_cmp(&a.name, &b.name))
        }),
    }
}
