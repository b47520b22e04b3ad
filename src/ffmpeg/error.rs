//! Map FFmpeg exit codes and stderr to user-friendly messages.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure.
//! A handful of well-known stderr phrases get a more specific summary;
//! the trimmed stderr tail is always kept as detail.

use serde::Serialize;

/// Frontend shows summary; detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

/// Stderr phrases that explain a failure better than the exit code does.
const KNOWN_STDERR_CAUSES: &[(&str, &str)] = &[
    ("matches no streams", "Input has no matching stream (e.g. no audio track)."),
    ("does not contain any stream", "Input has no stream to encode."),
    ("No space left on device", "Disk is full."),
    ("No such file or directory", "File or directory not found."),
    ("Invalid data found when processing input", "Input is corrupt or not a media file."),
    ("Unknown encoder", "Encoder is not available in this FFmpeg build."),
    ("Permission denied", "Permission denied."),
];

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match known_stderr_cause(stderr) {
        Some(cause) => cause.to_string(),
        None => match exit_code {
            Some(code) => {
                known_exit_code_summary(code).unwrap_or_else(|| summary_for_unknown_code(code))
            }
            None => first_line_truncated(stderr, 120),
        },
    };
    let detail = stderr.trim().to_string();
    FfmpegErrorPayload { summary, detail }
}

fn known_stderr_cause(stderr: &str) -> Option<&'static str> {
    KNOWN_STDERR_CAUSES
        .iter()
        .find(|(needle, _)| stderr.contains(needle))
        .map(|(_, cause)| *cause)
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}

const ELLIPSIS: &str = "…";

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let budget = max_len.saturating_sub(ELLIPSIS.len());
    let mut cut = budget;
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}

fn summary_for_unknown_code(code: i32) -> String {
    format!("FFmpeg failed (exit code {}).", code)
}
