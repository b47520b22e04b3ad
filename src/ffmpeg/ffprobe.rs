//! FFprobe-based media metadata extraction.
//!
//! Stateless: every call re-reads the file, nothing is cached, and the job
//! registry is never touched, so probing is safe alongside any number of jobs.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
    #[serde(default)]
    format_long_name: Option<String>,
    #[serde(default)]
    nb_streams: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    index: u32,
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    codec_long_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Other,
}

impl StreamKind {
    fn from_codec_type(codec_type: Option<&str>) -> Self {
        match codec_type {
            Some("video") => StreamKind::Video,
            Some("audio") => StreamKind::Audio,
            Some("subtitle") => StreamKind::Subtitle,
            Some("data") => StreamKind::Data,
            _ => StreamKind::Other,
        }
    }
}

/// Container-level facts.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub format_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_long_name: Option<String>,
    /// Seconds; 0.0 when the container does not report one.
    pub duration: f64,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
    pub nb_streams: u32,
}

/// One stream descriptor, in container order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_long_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// Read-only snapshot of a media file.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub container: ContainerInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaMetadata {
    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }

    pub fn has_audio(&self) -> bool {
        self.audio_streams().next().is_some()
    }
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_number<T: std::str::FromStr>(s: Option<&str>) -> Option<T> {
    s.and_then(|s| s.trim().parse().ok())
}

/// Parse ffprobe JSON output. A missing `format` section means the file was not
/// understood as media and is an error, never a partially filled result.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::probe(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output
        .format
        .ok_or_else(|| AppError::probe("ffprobe reported no container format"))?;

    let container = ContainerInfo {
        format_name: format
            .format_name
            .ok_or_else(|| AppError::probe("ffprobe reported no container format name"))?,
        format_long_name: format.format_long_name,
        duration: parse_number(format.duration.as_deref()).unwrap_or(0.0),
        size: parse_number(format.size.as_deref()).unwrap_or(0),
        bit_rate: parse_number(format.bit_rate.as_deref()),
        nb_streams: format.nb_streams.unwrap_or(output.streams.len() as u32),
    };

    let streams = output
        .streams
        .into_iter()
        .map(|s| StreamInfo {
            index: s.index,
            kind: StreamKind::from_codec_type(s.codec_type.as_deref()),
            codec_name: s.codec_name,
            codec_long_name: s.codec_long_name,
            width: s.width,
            height: s.height,
            fps: s
                .r_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .filter(|f| *f > 0.0),
            bit_rate: parse_number(s.bit_rate.as_deref()),
            channels: s.channels,
            sample_rate: parse_number(s.sample_rate.as_deref()),
        })
        .collect();

    Ok(MediaMetadata { container, streams })
}

/// Run ffprobe on a media file and return its metadata.
pub async fn probe_metadata(ffprobe: &Path, path: &Path) -> Result<MediaMetadata, AppError> {
    if !path.is_file() {
        return Err(AppError::probe(format!(
            "Input file not found: {}",
            path.display()
        )));
    }

    log::debug!(
        target: "vidkit::ffmpeg::ffprobe",
        "probe_metadata: path={}",
        path.display()
    );

    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path)
    .stdin(Stdio::null())
    .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let output = cmd
        .output()
        .await
        .map_err(|e| AppError::probe(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::probe(format!("ffprobe failed: {}", stderr.trim())));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::probe("ffprobe output was not valid UTF-8"))?;

    parse_ffprobe_json(&json)
}
