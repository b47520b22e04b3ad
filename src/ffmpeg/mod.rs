mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;

pub use builder::{
    Invocation, build_compress_args, build_convert_args, build_extract_audio_args,
    build_invocation, format_args_for_display_multiline,
};
pub use discovery::{BuildMode, EnginePaths, list_encoders, list_formats};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use ffprobe::{MediaMetadata, probe_metadata};
pub use progress::{ProgressParser, RawProgress, parse_duration_line};
pub use runner::{EngineEvent, EngineProcess, ProcessHandle, spawn_engine};

