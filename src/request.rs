//! Operation requests: one immutable value per user intent, validated per kind
//! before any engine process is started.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::jobs::JobId;

/// Accepted CRF range for compress. Lower means higher quality and larger output.
pub const QUALITY_RANGE: std::ops::RangeInclusive<u8> = 0..=51;
pub const DEFAULT_QUALITY: u8 = 23;

/// Accepted audio bitrate range for extract-audio, in kbps.
pub const AUDIO_BITRATE_RANGE: std::ops::RangeInclusive<u32> = 32..=320;
pub const DEFAULT_AUDIO_BITRATE: u32 = 192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Compress,
    Convert,
    ExtractAudio,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Compress => "compress",
            OperationKind::Convert => "convert",
            OperationKind::ExtractAudio => "extract-audio",
        })
    }
}

/// x264 speed/efficiency tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub const ALL: [Preset; 9] = [
        Preset::Ultrafast,
        Preset::Superfast,
        Preset::Veryfast,
        Preset::Faster,
        Preset::Fast,
        Preset::Medium,
        Preset::Slow,
        Preset::Slower,
        Preset::Veryslow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }
}

impl FromStr for Preset {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::invocation(format!("unknown preset: {}", s)))
    }
}

/// Target container for convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mkv,
    Mov,
    Avi,
    Webm,
}

impl ContainerFormat {
    pub const ALL: [ContainerFormat; 5] = [
        ContainerFormat::Mp4,
        ContainerFormat::Mkv,
        ContainerFormat::Mov,
        ContainerFormat::Avi,
        ContainerFormat::Webm,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Webm => "webm",
        }
    }

    /// FFmpeg muxer name passed to `-f`.
    pub fn muxer(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mkv => "matroska",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Webm => "webm",
        }
    }

    /// Default (video, audio) encoders known to be accepted by the container.
    pub fn default_codecs(self) -> (&'static str, &'static str) {
        match self {
            ContainerFormat::Mp4 | ContainerFormat::Mkv | ContainerFormat::Mov => {
                ("libx264", "aac")
            }
            ContainerFormat::Avi => ("libx264", "libmp3lame"),
            ContainerFormat::Webm => ("libvpx-vp9", "libopus"),
        }
    }
}

/// Target audio format for extract-audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Aac,
    M4a,
    Wav,
    Flac,
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 6] = [
        AudioFormat::Mp3,
        AudioFormat::Aac,
        AudioFormat::M4a,
        AudioFormat::Wav,
        AudioFormat::Flac,
        AudioFormat::Ogg,
    ];

    pub fn codec(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Aac | AudioFormat::M4a => "aac",
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "libvorbis",
        }
    }

    pub fn muxer(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "adts",
            AudioFormat::M4a => "ipod",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, AudioFormat::Wav | AudioFormat::Flac)
    }
}

/// Output frame size, e.g. `1280x720`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::invocation(format!("resolution must look like 1280x720, got {}", s));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(AppError::invocation(format!(
                "resolution must use positive even dimensions, got {}",
                s
            )));
        }
        Ok(Resolution { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressOptions {
    pub quality: Option<u8>,
    pub preset: Option<Preset>,
    /// Optional `WxH` output size.
    pub resolution: Option<String>,
}

impl CompressOptions {
    pub fn effective_quality(&self) -> u8 {
        self.quality.unwrap_or(DEFAULT_QUALITY)
    }

    pub fn effective_preset(&self) -> Preset {
        self.preset.unwrap_or_default()
    }
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            quality: Some(DEFAULT_QUALITY),
            preset: Some(Preset::Medium),
            resolution: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOptions {
    #[serde(default)]
    pub format: ContainerFormat,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl ConvertOptions {
    pub fn effective_video_codec(&self) -> &str {
        self.video_codec
            .as_deref()
            .unwrap_or(self.format.default_codecs().0)
    }

    pub fn effective_audio_codec(&self) -> &str {
        self.audio_codec
            .as_deref()
            .unwrap_or(self.format.default_codecs().1)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAudioOptions {
    #[serde(default)]
    pub format: AudioFormat,
    pub bitrate_kbps: Option<u32>,
}

impl ExtractAudioOptions {
    pub fn effective_bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps.unwrap_or(DEFAULT_AUDIO_BITRATE)
    }
}

/// Kind-specific options bag.
#[derive(Debug, Clone)]
pub enum OperationOptions {
    Compress(CompressOptions),
    Convert(ConvertOptions),
    ExtractAudio(ExtractAudioOptions),
}

/// One user intent. Constructed by the boundary, consumed once by the orchestrator.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub options: OperationOptions,
    /// Caller-chosen id; generated at submission when absent.
    pub job_id: Option<JobId>,
    /// Input duration when already known (e.g. from a probe), so percent is
    /// available before the engine prints its banner.
    pub duration_secs: Option<f64>,
}

impl OperationRequest {
    pub fn compress(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: CompressOptions,
    ) -> Self {
        Self::new(input, output, OperationOptions::Compress(options))
    }

    pub fn convert(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: ConvertOptions,
    ) -> Self {
        Self::new(input, output, OperationOptions::Convert(options))
    }

    pub fn extract_audio(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: ExtractAudioOptions,
    ) -> Self {
        Self::new(input, output, OperationOptions::ExtractAudio(options))
    }

    fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, options: OperationOptions) -> Self {
        Self {
            input_path: input.into(),
            output_path: output.into(),
            options,
            job_id: None,
            duration_secs: None,
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs).filter(|s| s.is_finite() && *s > 0.0);
        self
    }

    pub fn kind(&self) -> OperationKind {
        match self.options {
            OperationOptions::Compress(_) => OperationKind::Compress,
            OperationOptions::Convert(_) => OperationKind::Convert,
            OperationOptions::ExtractAudio(_) => OperationKind::ExtractAudio,
        }
    }

    /// Reject anything that would make the engine invocation invalid or unsafe.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.input_path.as_os_str().is_empty() {
            return Err(AppError::invocation("input path is empty"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(AppError::invocation("output path is empty"));
        }
        for (label, path) in [("input", &self.input_path), ("output", &self.output_path)] {
            if path.to_str().is_none() {
                return Err(AppError::invocation(format!(
                    "{} path is not valid UTF-8: {}",
                    label,
                    path.display()
                )));
            }
        }
        // Partial outputs are deleted on failure; never let that be the input.
        if same_file(&self.input_path, &self.output_path) {
            return Err(AppError::invocation("output path must differ from input path"));
        }
        if let Some(id) = &self.job_id
            && id.as_str().trim().is_empty()
        {
            return Err(AppError::invocation("job id is empty"));
        }

        match &self.options {
            OperationOptions::Compress(o) => {
                let quality = o.effective_quality();
                if !QUALITY_RANGE.contains(&quality) {
                    return Err(AppError::invocation(format!(
                        "quality must be between {} and {}, got {}",
                        QUALITY_RANGE.start(),
                        QUALITY_RANGE.end(),
                        quality
                    )));
                }
                if let Some(res) = &o.resolution {
                    res.parse::<Resolution>()?;
                }
            }
            OperationOptions::Convert(o) => {
                for (label, codec) in [("video", &o.video_codec), ("audio", &o.audio_codec)] {
                    if let Some(codec) = codec {
                        validate_codec_token(label, codec)?;
                    }
                }
            }
            OperationOptions::ExtractAudio(o) => {
                let bitrate = o.effective_bitrate_kbps();
                if !AUDIO_BITRATE_RANGE.contains(&bitrate) {
                    return Err(AppError::invocation(format!(
                        "audio bitrate must be between {} and {} kbps, got {}",
                        AUDIO_BITRATE_RANGE.start(),
                        AUDIO_BITRATE_RANGE.end(),
                        bitrate
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_codec_token(label: &str, codec: &str) -> Result<(), AppError> {
    let valid = !codec.is_empty()
        && !codec.starts_with('-')
        && codec
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(AppError::invocation(format!("invalid {} codec: {:?}", label, codec)))
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compress_with(quality: u8) -> OperationRequest {
        OperationRequest::compress(
            "in.mov",
            "out.mp4",
            CompressOptions {
                quality: Some(quality),
                ..CompressOptions::default()
            },
        )
    }

    #[test]
    fn quality_bounds_are_inclusive() {
        assert!(compress_with(0).validate().is_ok());
        assert!(compress_with(51).validate().is_ok());
        let err = compress_with(52).validate().unwrap_err();
        assert!(matches!(err, AppError::Invocation(_)));
        assert!(err.to_string().contains("between 0 and 51"));
    }

    #[test]
    fn compress_defaults() {
        let o = CompressOptions::default();
        assert_eq!(o.effective_quality(), 23);
        assert_eq!(o.effective_preset(), Preset::Medium);
        let empty = CompressOptions {
            quality: None,
            preset: None,
            resolution: None,
        };
        assert_eq!(empty.effective_quality(), DEFAULT_QUALITY);
        assert_eq!(empty.effective_preset(), Preset::Medium);
    }

    #[test]
    fn preset_parses_case_insensitively() {
        assert_eq!("Medium".parse::<Preset>().unwrap(), Preset::Medium);
        assert_eq!("veryslow".parse::<Preset>().unwrap(), Preset::Veryslow);
        assert!("turbo".parse::<Preset>().is_err());
    }

    #[test]
    fn preset_deserializes_from_lowercase() {
        let o: CompressOptions =
            serde_json::from_str(r#"{"quality": 28, "preset": "slow"}"#).unwrap();
        assert_eq!(o.effective_preset(), Preset::Slow);
        assert_eq!(o.effective_quality(), 28);
    }

    #[test]
    fn resolution_requires_even_positive_dimensions() {
        assert_eq!(
            "1280x720".parse::<Resolution>().unwrap(),
            Resolution {
                width: 1280,
                height: 720
            }
        );
        assert!("1281x720".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
        assert!("hd".parse::<Resolution>().is_err());
    }

    #[test]
    fn same_input_and_output_is_rejected() {
        let req = OperationRequest::convert("clip.mp4", "clip.mp4", ConvertOptions::default());
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("differ"));
    }

    #[test]
    fn empty_paths_are_rejected() {
        let req = OperationRequest::convert("", "out.mkv", ConvertOptions::default());
        assert!(req.validate().is_err());
        let req = OperationRequest::convert("in.mp4", "", ConvertOptions::default());
        assert!(req.validate().is_err());
    }

    #[test]
    fn codec_overrides_cannot_inject_flags() {
        let req = OperationRequest::convert(
            "in.mp4",
            "out.mkv",
            ConvertOptions {
                format: ContainerFormat::Mkv,
                video_codec: Some("-f".into()),
                audio_codec: None,
            },
        );
        assert!(req.validate().is_err());
        let req = OperationRequest::convert(
            "in.mp4",
            "out.mkv",
            ConvertOptions {
                format: ContainerFormat::Mkv,
                video_codec: Some("libx265".into()),
                audio_codec: Some("libopus".into()),
            },
        );
        assert!(req.validate().is_ok());
    }

    #[test]
    fn convert_uses_container_defaults_unless_overridden() {
        let webm = ConvertOptions {
            format: ContainerFormat::Webm,
            ..ConvertOptions::default()
        };
        assert_eq!(webm.effective_video_codec(), "libvpx-vp9");
        assert_eq!(webm.effective_audio_codec(), "libopus");
        let mp4 = ConvertOptions {
            audio_codec: Some("libmp3lame".into()),
            ..ConvertOptions::default()
        };
        assert_eq!(mp4.effective_video_codec(), "libx264");
        assert_eq!(mp4.effective_audio_codec(), "libmp3lame");
    }

    #[test]
    fn audio_bitrate_bounds() {
        let with = |kbps| {
            OperationRequest::extract_audio(
                "in.mp4",
                "out.mp3",
                ExtractAudioOptions {
                    format: AudioFormat::Mp3,
                    bitrate_kbps: Some(kbps),
                },
            )
        };
        assert!(with(32).validate().is_ok());
        assert!(with(320).validate().is_ok());
        assert!(with(16).validate().is_err());
        assert!(with(512).validate().is_err());
        assert_eq!(ExtractAudioOptions::default().effective_bitrate_kbps(), 192);
    }

    #[test]
    fn blank_job_id_is_rejected() {
        let req = compress_with(23).with_job_id(JobId::from("  "));
        assert!(req.validate().is_err());
    }
}
