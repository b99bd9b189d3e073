use regex::Regex;
use std::sync::LazyLock;

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("invalid time regex")
});

/// Elapsed output time in seconds from an FFmpeg stderr status line (`time=HH:MM:SS.ms`).
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `min(100, round(elapsed / duration * 100))`; 0 when duration is not positive.
pub fn percent(elapsed_secs: f64, duration_secs: f64) -> u8 {
    if duration_secs <= 0.0 || !elapsed_secs.is_finite() {
        return 0;
    }
    (elapsed_secs / duration_secs * 100.0).round().clamp(0.0, 100.0) as u8
}
