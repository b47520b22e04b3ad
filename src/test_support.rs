//! Test-only helpers exposed for integration test targets (real FFmpeg required).

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use crate::error::AppError;
use crate::ffmpeg::{EnginePaths, MediaMetadata, probe_metadata};

/// Stream layout of a generated clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    /// Test pattern plus a sine tone.
    WithAudio,
    /// Test pattern only.
    VideoOnly,
}

/// Generate an H.264 clip from lavfi sources.
pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    kind: ClipKind,
) -> std::io::Result<ExitStatus> {
    let mut args: Vec<String> = vec![
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        format!("testsrc=duration={}:size=320x240:rate=30", duration_secs),
    ];
    if kind == ClipKind::WithAudio {
        args.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("sine=frequency=440:duration={}", duration_secs),
            "-c:a".into(),
            "aac".into(),
        ]);
    }
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
    ]);
    Command::new(ffmpeg)
        .args(&args)
        .arg(output_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

/// Engine paths for the host, as the sidecar would resolve them.
pub fn resolve_engine_for_test() -> Result<EnginePaths, AppError> {
    EnginePaths::resolve_cached().cloned()
}

/// Probe with the resolved ffprobe.
pub async fn probe_for_test(path: &Path) -> Result<MediaMetadata, AppError> {
    let engine = resolve_engine_for_test()?;
    probe_metadata(&engine.ffprobe, path).await
}
