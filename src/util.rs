use std::{cmp::Ordering, time::Duration};

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use rlimit::Resource;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Truncates a string to a maximum length, adding `...` to the end if it was truncated.
///
/// This function will continuously try to reduce length if string is being
/// truncated in the middle of a UTF codepoint
///
/// # Arguments
/// * `string` - The string to truncate
/// * `max_length` - The maximum length of the string, at least 4
#[must_use]
pub fn truncate_string(string: &impl ToString, max_length: usize) -> String {
    let string = string.to_string();
    if string.len() <= max_length || max_length < 4 {
        return string;
    }

    let mut attempted_len = max_length - 3;
    while !string.is_char_boundary(attempted_len) {
        attempted_len -= 1;
    }

    format!("{}...", &string[..attempted_len])
}

/// Compares two strings treating runs of ASCII digits as numbers, so `CCTV2` sorts before `CCTV10`
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut x_digits = String::new();
                while let Some(c) = a.next_if(char::is_ascii_digit) {
                    x_digits.push(c);
                }
                let mut y_digits = String::new();
                while let Some(c) = b.next_if(char::is_ascii_digit) {
                    y_digits.push(c);
                }

                let x_trimmed = x_digits.trim_start_matches('0');
                let y_trimmed = y_digits.trim_start_matches('0');
                let ord = x_trimmed
                    .len()
                    .cmp(&y_trimmed.len())
                    .then_with(|| x_trimmed.cmp(y_trimmed))
                    .then_with(|| x_digits.len().cmp(&y_digits.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.cmp(&y);
                if ord != Ordering::Equal {
                    return ord;
                }
                a.next();
                b.next();
            }
        }
    }
}

/// Warns when the open file limit is too low for the requested amount of concurrent checks.
/// Every check holds a socket open.
pub fn warn_ulimit(parallelism: usize) {
    let Ok((limit, _)) = rlimit::getrlimit(Resource::NOFILE) else {
        return;
    };

    let wanted = (parallelism as u64).saturating_mul(2).saturating_add(64);
    if limit < wanted {
        warn!(
            "Your file limit ({limit}) is low for {parallelism} parallel checks and may cause connection errors. Consider raising your file limit via `ulimit -n {wanted}` or lowering `--parallelism`"
        );
    }
}

/// # Errors
/// Errors when the HTTP client cannot be initialized (e.g. TLS backend failure)
pub fn init_http_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "User-Agent",
        HeaderValue::from_str(&format!(
            "{}/{} (+{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY")
        ))
        .context("Building User-Agent header")?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Unable to build HTTP client")
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal!");
        ct.cancel();
    });
}
