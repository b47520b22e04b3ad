//! Parsing of FFmpeg `-progress pipe:1` key/value blocks and the stderr
//! `Duration:` banner into raw, engine-shaped progress values.

use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex")
});

/// One progress block as the engine reported it. Any field may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawProgress {
    /// Percent complete, unclamped. None while the input duration is unknown.
    pub percent: Option<f64>,
    /// Output timestamp reached so far, in seconds.
    pub out_time_secs: Option<f64>,
    /// Bytes written to the output so far.
    pub total_size: Option<u64>,
}

/// Parse the input duration from an FFmpeg stderr banner line.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Accumulates `key=value` lines until a `progress=` line closes the block.
#[derive(Debug, Default)]
pub struct ProgressParser {
    duration: Option<f64>,
    out_time_secs: Option<f64>,
    total_size: Option<u64>,
}

impl ProgressParser {
    pub fn new(duration_hint: Option<f64>) -> Self {
        Self {
            duration: duration_hint.filter(|d| *d > 0.0),
            ..Self::default()
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Feed a stderr line. Only the first `Duration:` line is honoured.
    pub fn feed_stderr_line(&mut self, line: &str) {
        if self.duration.is_some() {
            return;
        }
        if let Some(d) = parse_duration_line(line).filter(|d| *d > 0.0) {
            self.duration = Some(d);
        }
    }

    /// Feed a stdout progress line; returns a value when a block completes.
    pub fn feed_progress_line(&mut self, line: &str) -> Option<RawProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            // out_time_ms is microseconds as well (long-standing FFmpeg quirk).
            "out_time_us" | "out_time_ms" => {
                if let Some(us) = value.parse::<i64>().ok().filter(|us| *us >= 0) {
                    self.out_time_secs = Some(us as f64 / 1_000_000.0);
                }
                None
            }
            "total_size" => {
                self.total_size = value.parse::<u64>().ok();
                None
            }
            "progress" => {
                let percent = if value == "end" {
                    Some(100.0)
                } else {
                    match (self.out_time_secs, self.duration) {
                        (Some(t), Some(d)) => Some(t / d * 100.0),
                        _ => None,
                    }
                };
                Some(RawProgress {
                    percent,
                    out_time_secs: self.out_time_secs,
                    total_size: self.total_size,
                })
            }
            _ => None,
        }
    }
}
