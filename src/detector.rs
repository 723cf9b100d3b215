//! Background log detector: after a `detect`-mode service starts, watches
//! its pane output for a URL-like line announcing the port it actually
//! bound to.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::supervisor::Supervisor;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const TIMEOUT: Duration = Duration::from_secs(15);
const CAPTURE_LINES: u32 = 2000;

fn port_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:https?://)?(?:localhost|127\.0\.0\.1|\[::1\]|0\.0\.0\.0):(\d{2,5})")
            .unwrap()
    })
}

/// Polls `name`'s pane after a start, returning the first port a new line
/// announces. Returns `None` after `TIMEOUT` with nothing found.
pub async fn detect_port<S: Supervisor>(supervisor: &S, name: &str) -> Option<u16> {
    let mut previous = supervisor.capture_pane(name, CAPTURE_LINES, false).await.unwrap_or_default();
    let deadline = Instant::now() + TIMEOUT;

    while Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        let current = supervisor
            .capture_pane(name, CAPTURE_LINES, false)
            .await
            .unwrap_or_default();
        if current == previous {
            continue;
        }
        let fresh = new_suffix(&previous, &current);
        if let Some(port) = scan_for_port(fresh) {
            return Some(port);
        }
        previous = current;
    }
    None
}

fn new_suffix<'a>(previous: &str, current: &'a str) -> &'a str {
    if current.starts_with(previous) {
        &current[previous.len()..]
    } else {
        current
    }
}

/// Scans `text` line by line for the last plausible port match, skipping
/// lines that look like an "address already in use" error.
pub fn scan_for_port(text: &str) -> Option<u16> {
    let mut found = None;
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("in use") || lower.contains("eaddrinuse") {
            continue;
        }
        for caps in port_pattern().captures_iter(line) {
            if let Ok(port) = caps[1].parse::<u16>() {
                found = Some(port);
            }
        }
    }
    found
}
