//! Boundary service used by the sidecar binary and by embedding hosts.
//!
//! Every entry point is keyed by job id; nothing here assumes a single active
//! job. Limiting the UI to one job at a time is the caller's policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AppError;
use crate::ffmpeg::{
    EnginePaths, MediaMetadata, build_invocation, format_args_for_display_multiline,
    list_encoders, list_formats, probe_metadata,
};
use crate::jobs::{Job, JobId, JobRegistry, Orchestrator};
use crate::request::{
    AUDIO_BITRATE_RANGE, AudioFormat, CompressOptions, ContainerFormat, ConvertOptions,
    DEFAULT_AUDIO_BITRATE, DEFAULT_QUALITY, ExtractAudioOptions, OperationKind, OperationRequest,
    Preset, QUALITY_RANGE,
};

const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericRange {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg_path: PathBuf,
    pub operations: Vec<OperationKind>,
    pub presets: Vec<Preset>,
    pub quality: NumericRange,
    pub container_formats: Vec<ContainerFormat>,
    pub audio_formats: Vec<AudioFormat>,
    pub audio_bitrate_kbps: NumericRange,
    /// Encoders compiled into the resolved FFmpeg.
    pub encoders: Vec<String>,
    /// Muxers compiled into the resolved FFmpeg.
    pub formats: Vec<String>,
}

#[derive(Debug)]
pub struct MediaService {
    orchestrator: Orchestrator,
}

impl MediaService {
    pub fn new(engine: EnginePaths) -> Self {
        Self::with_registry(engine, Arc::new(JobRegistry::new()))
    }

    pub fn with_registry(engine: EnginePaths, registry: Arc<JobRegistry>) -> Self {
        Self {
            orchestrator: Orchestrator::new(engine, registry),
        }
    }

    /// Resolve the engine for this host (env overrides, bundled, then PATH).
    pub fn from_environment() -> Result<Self, AppError> {
        let engine = EnginePaths::resolve_cached()?.clone();
        log::info!(
            target: "vidkit::sidecar_api",
            "Using ffmpeg={}, ffprobe={}",
            engine.ffmpeg.display(),
            engine.ffprobe.display()
        );
        Ok(Self::new(engine))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn probe_metadata(&self, path: &Path) -> Result<MediaMetadata, AppError> {
        probe_metadata(&self.orchestrator.engine().ffprobe, path).await
    }

    pub fn submit(&self, request: OperationRequest) -> Result<Job, AppError> {
        self.orchestrator.submit(request)
    }

    pub fn submit_compress(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: CompressOptions,
        job_id: Option<JobId>,
    ) -> Result<Job, AppError> {
        self.submit(with_id(OperationRequest::compress(input, output, options), job_id))
    }

    pub fn submit_convert(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: ConvertOptions,
        job_id: Option<JobId>,
    ) -> Result<Job, AppError> {
        self.submit(with_id(OperationRequest::convert(input, output, options), job_id))
    }

    pub fn submit_extract_audio(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: ExtractAudioOptions,
        job_id: Option<JobId>,
    ) -> Result<Job, AppError> {
        self.submit(with_id(
            OperationRequest::extract_audio(input, output, options),
            job_id,
        ))
    }

    /// True when a running job was actually cancelled.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        self.orchestrator.cancel(job_id).effected()
    }

    /// Supported operations and option ranges, plus what the resolved FFmpeg can encode and mux.
    /// Runs the engine twice; call from a blocking context.
    pub fn capabilities(&self) -> Result<AppCapabilitiesResult, AppError> {
        let ffmpeg = &self.orchestrator.engine().ffmpeg;
        Ok(AppCapabilitiesResult {
            protocol_version: PROTOCOL_VERSION,
            ffmpeg_path: ffmpeg.clone(),
            operations: vec![
                OperationKind::Compress,
                OperationKind::Convert,
                OperationKind::ExtractAudio,
            ],
            presets: Preset::ALL.to_vec(),
            quality: NumericRange {
                min: u32::from(*QUALITY_RANGE.start()),
                max: u32::from(*QUALITY_RANGE.end()),
                default: u32::from(DEFAULT_QUALITY),
            },
            container_formats: ContainerFormat::ALL.to_vec(),
            audio_formats: AudioFormat::ALL.to_vec(),
            audio_bitrate_kbps: NumericRange {
                min: *AUDIO_BITRATE_RANGE.start(),
                max: *AUDIO_BITRATE_RANGE.end(),
                default: DEFAULT_AUDIO_BITRATE,
            },
            encoders: list_encoders(ffmpeg)?,
            formats: list_formats(ffmpeg)?,
        })
    }

    /// The exact command a request would run, one option per line.
    pub fn preview_command(&self, request: &OperationRequest) -> Result<String, AppError> {
        request.validate()?;
        let invocation = build_invocation(request)?;
        Ok(format!(
            "ffmpeg\n{}",
            format_args_for_display_multiline(&invocation.args)
        ))
    }

    /// Cancel everything still running.
    pub fn shutdown(&self) -> usize {
        self.orchestrator.shutdown()
    }
}

fn with_id(request: OperationRequest, job_id: Option<JobId>) -> OperationRequest {
    match job_id {
        Some(id) => request.with_job_id(id),
        None => request,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::jobs::Outcome;
    use crate::test_util::{HANG_SCRIPT, NO_AUDIO_SCRIPT, SUCCESS_SCRIPT, engine_paths, fake_engine};

    const CAPABILITIES_SCRIPT: &str = r#"
case "$2" in
  -encoders)
    echo "Encoders:"
    echo " ------"
    echo " V....D libx264              libx264 H.264"
    echo " A....D aac                  AAC (Advanced Audio Coding)"
    ;;
  -formats)
    echo "File formats:"
    echo " --"
    echo "  E mp4             MP4 (MPEG-4 Part 14)"
    echo " DE matroska,webm   Matroska / WebM"
    ;;
esac
exit 0
"#;

    #[tokio::test]
    async fn submit_compress_settles_with_success() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::new(engine_paths(&fake_engine(dir.path(), SUCCESS_SCRIPT)));
        let job = service
            .submit_compress(
                dir.path().join("sample.mov"),
                dir.path().join("out.mp4"),
                CompressOptions::default(),
                Some(JobId::from("ui-1")),
            )
            .unwrap();
        assert_eq!(job.id, JobId::from("ui-1"));
        assert_eq!(job.kind, OperationKind::Compress);
        assert!(job.wait().await.is_success());
    }

    #[tokio::test]
    async fn cancel_reports_whether_it_took_effect() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::new(engine_paths(&fake_engine(dir.path(), HANG_SCRIPT)));
        let job = service
            .submit_convert(
                dir.path().join("in.mov"),
                dir.path().join("out.mkv"),
                ConvertOptions::default(),
                None,
            )
            .unwrap();
        assert!(service.cancel(&job.id));
        assert!(!service.cancel(&job.id));
        assert_eq!(job.wait().await, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn extract_audio_failure_surfaces_as_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::new(engine_paths(&fake_engine(dir.path(), NO_AUDIO_SCRIPT)));
        let job = service
            .submit_extract_audio(
                dir.path().join("video-only.mp4"),
                dir.path().join("out.mp3"),
                ExtractAudioOptions::default(),
                None,
            )
            .unwrap();
        assert!(matches!(job.wait().await, Outcome::Failure { .. }));
    }

    #[test]
    fn capabilities_lists_ranges_and_engine_support() {
        let dir = tempfile::tempdir().unwrap();
        let service =
            MediaService::new(engine_paths(&fake_engine(dir.path(), CAPABILITIES_SCRIPT)));
        let caps = service.capabilities().unwrap();
        assert_eq!(caps.quality.min, 0);
        assert_eq!(caps.quality.max, 51);
        assert_eq!(caps.quality.default, 23);
        assert_eq!(caps.presets.len(), 9);
        assert_eq!(caps.operations.len(), 3);
        assert_eq!(caps.encoders, vec!["libx264", "aac"]);
        assert!(caps.formats.contains(&"mp4".to_string()));

        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["operations"][2], "extractAudio");
        assert_eq!(json["audioBitrateKbps"]["default"], 192);
    }

    #[test]
    fn preview_command_shows_invocation() {
        let service = MediaService::new(EnginePaths::new("/x/ffmpeg", "/x/ffprobe"));
        let request =
            OperationRequest::compress("<input>", "<output>", CompressOptions::default());
        let preview = service.preview_command(&request).unwrap();
        assert!(preview.starts_with("ffmpeg\n"));
        assert!(preview.contains("  -crf 23"));
        assert!(preview.contains("  -i <input>"));
        assert!(preview.ends_with("  <output>"));
    }

    #[test]
    fn preview_command_rejects_invalid_options() {
        let service = MediaService::new(EnginePaths::new("/x/ffmpeg", "/x/ffprobe"));
        let request = OperationRequest::extract_audio(
            "in.mp4",
            "out.mp3",
            ExtractAudioOptions {
                format: AudioFormat::Mp3,
                bitrate_kbps: Some(8),
            },
        );
        assert!(matches!(
            service.preview_command(&request),
            Err(AppError::Invocation(_))
        ));
    }
}
