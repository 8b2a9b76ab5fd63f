//! Small formatting helpers shared by the client and the CLI.

use std::time::Duration;

/// Split a duration into whole hours, minutes and seconds.
pub fn split_hms(d: Duration) -> (u64, u64, u64) {
    let secs = d.as_secs();
    (secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Format a duration as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_hms(d: Duration) -> String {
    let (h, m, s) = split_hms(d);
    format!("{h:02}:{m:02}:{s:02}")
}

/// First `max` characters of a response body, for error messages.
pub(crate) fn body_snippet(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
