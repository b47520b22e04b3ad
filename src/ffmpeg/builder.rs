//! Deterministic FFmpeg argument vectors, one builder per operation kind.
//!
//! Every invocation shares the same prologue so progress is always reported
//! on stdout as `-progress` key/value blocks, whatever the kind.

use std::path::Path;

use crate::error::AppError;
use crate::request::{
    CompressOptions, ConvertOptions, ExtractAudioOptions, OperationKind, OperationOptions,
    OperationRequest, Resolution,
};

/// Fully encoded engine arguments for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub kind: OperationKind,
    pub args: Vec<String>,
}

fn prologue(input_path: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-nostdin",
        "-y",
        "-nostats",
        "-progress",
        "pipe:1",
        "-i",
        input_path,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    args.push(flag.to_string());
    args.push(value.into());
}

pub fn build_compress_args(
    input_path: &str,
    output_path: &str,
    options: &CompressOptions,
) -> Result<Vec<String>, AppError> {
    let crf = options.effective_quality();
    let preset = options.effective_preset();

    log::debug!(
        target: "vidkit::ffmpeg::builder",
        "Building compress command: CRF={}, preset={}, input={} -> output={}",
        crf,
        preset.as_str(),
        input_path,
        output_path
    );

    let mut args = prologue(input_path);
    push_pair(&mut args, "-c:v", "libx264");
    push_pair(&mut args, "-crf", crf.to_string());
    push_pair(&mut args, "-preset", preset.as_str());
    if let Some(res) = options.resolution.as_deref() {
        let res: Resolution = res.parse()?;
        push_pair(&mut args, "-vf", format!("scale={}:{}", res.width, res.height));
    }
    push_pair(&mut args, "-c:a", "aac");
    push_pair(&mut args, "-movflags", "+faststart");
    push_pair(&mut args, "-f", "mp4");
    args.push(output_path.to_string());
    Ok(args)
}

pub fn build_convert_args(input_path: &str, output_path: &str, options: &ConvertOptions) -> Vec<String> {
    log::debug!(
        target: "vidkit::ffmpeg::builder",
        "Building convert command: format={}, video={}, audio={}, input={} -> output={}",
        options.format.extension(),
        options.effective_video_codec(),
        options.effective_audio_codec(),
        input_path,
        output_path
    );

    let mut args = prologue(input_path);
    push_pair(&mut args, "-c:v", options.effective_video_codec());
    if options.effective_video_codec().contains("vpx") {
        // Constant-quality mode for VP8/VP9.
        push_pair(&mut args, "-b:v", "0");
        push_pair(&mut args, "-crf", "31");
        push_pair(&mut args, "-row-mt", "1");
    }
    push_pair(&mut args, "-c:a", options.effective_audio_codec());
    push_pair(&mut args, "-f", options.format.muxer());
    args.push(output_path.to_string());
    args
}

pub fn build_extract_audio_args(
    input_path: &str,
    output_path: &str,
    options: &ExtractAudioOptions,
) -> Vec<String> {
    let format = options.format;

    log::debug!(
        target: "vidkit::ffmpeg::builder",
        "Building extract-audio command: codec={}, bitrate={}k, input={} -> output={}",
        format.codec(),
        options.effective_bitrate_kbps(),
        input_path,
        output_path
    );

    let mut args = prologue(input_path);
    args.push("-vn".to_string());
    // No trailing '?': a video-only input must fail rather than yield an empty file.
    push_pair(&mut args, "-map", "0:a:0");
    push_pair(&mut args, "-c:a", format.codec());
    if !format.is_lossless() {
        push_pair(&mut args, "-b:a", format!("{}k", options.effective_bitrate_kbps()));
    }
    push_pair(&mut args, "-f", format.muxer());
    args.push(output_path.to_string());
    args
}

/// Path as an engine argument. Non-UTF-8 paths are refused rather than lossily converted,
/// which would point the engine at a different file.
fn path_arg<'a>(label: &str, path: &'a Path) -> Result<&'a str, AppError> {
    path.to_str().ok_or_else(|| {
        AppError::invocation(format!("{} path is not valid UTF-8: {}", label, path.display()))
    })
}

/// Build the invocation for a validated request.
pub fn build_invocation(request: &OperationRequest) -> Result<Invocation, AppError> {
    let input = path_arg("input", &request.input_path)?;
    let output = path_arg("output", &request.output_path)?;
    let args = match &request.options {
        OperationOptions::Compress(o) => build_compress_args(&input, &output, o)?,
        OperationOptions::Convert(o) => build_convert_args(&input, &output, o),
        OperationOptions::ExtractAudio(o) => build_extract_audio_args(&input, &output, o),
    };
    Ok(Invocation {
        kind: request.kind(),
        args,
    })
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = match args.get(i + 1) {
            Some(value) if arg.starts_with('-') && !value.starts_with('-') => {
                i += 2;
                format!("  {} {}", arg, value)
            }
            _ => {
                i += 1;
                format!("  {}", arg)
            }
        };
        lines.push(line);
    }
    lines.join("\n")
}
