//! Locating the FFmpeg/ffprobe executables for this host, and listing what
//! the resolved build can do.
//!
//! Resolution order: `FFMPEG_PATH`/`FFPROBE_PATH` overrides, then the bundled
//! binaries of a packaged build (`<resources>/ffmpeg/<os>-<arch>/ffmpeg`), then
//! common install locations and `PATH` for development builds. The result is
//! computed once per process and treated as immutable afterwards.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::error::AppError;

const RESOURCES_DIR_ENV: &str = "VIDKIT_RESOURCES_DIR";

/// Whether the host is a packaged (distributed) build or a development checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    Packaged { resources_dir: PathBuf },
    Development,
}

impl BuildMode {
    /// Packaged when `VIDKIT_RESOURCES_DIR` is set or a `resources/` directory
    /// sits next to the running executable.
    pub fn detect() -> Self {
        if let Ok(dir) = std::env::var(RESOURCES_DIR_ENV) {
            return BuildMode::Packaged {
                resources_dir: PathBuf::from(dir),
            };
        }
        let bundled = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.join("resources")))
            .filter(|p| p.is_dir());
        match bundled {
            Some(resources_dir) => BuildMode::Packaged { resources_dir },
            None => BuildMode::Development,
        }
    }
}

/// Resolved engine executables. Cheap to clone; injected into the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

static ENGINE_PATHS_CACHE: OnceLock<EnginePaths> = OnceLock::new();

impl EnginePaths {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Resolve for the current host. Cached for process lifetime.
    pub fn resolve_cached() -> Result<&'static EnginePaths, AppError> {
        if let Some(paths) = ENGINE_PATHS_CACHE.get() {
            return Ok(paths);
        }
        let resolved = Self::resolve(&BuildMode::detect())?;
        // Another thread may have won the race; either value is equivalent.
        Ok(ENGINE_PATHS_CACHE.get_or_init(|| resolved))
    }

    pub fn resolve(mode: &BuildMode) -> Result<EnginePaths, AppError> {
        let ffmpeg = match env_override("FFMPEG_PATH") {
            Some(p) => p,
            None => resolve_ffmpeg(mode)?,
        };
        let ffprobe = match env_override("FFPROBE_PATH") {
            Some(p) => p,
            None => resolve_ffprobe(mode, &ffmpeg)?,
        };
        log::debug!(
            target: "vidkit::ffmpeg::discovery",
            "Engine resolved: mode={:?}, ffmpeg={}, ffprobe={}",
            mode,
            ffmpeg.display(),
            ffprobe.display()
        );
        Ok(EnginePaths { ffmpeg, ffprobe })
    }
}

fn env_override(var: &str) -> Option<PathBuf> {
    let p = PathBuf::from(std::env::var(var).ok()?);
    if p.exists() {
        log::debug!(
            target: "vidkit::ffmpeg::discovery",
            "{} override: {}",
            var,
            p.display()
        );
        Some(p)
    } else {
        log::warn!(
            target: "vidkit::ffmpeg::discovery",
            "{} points at a missing file, ignoring: {}",
            var,
            p.display()
        );
        None
    }
}

fn exe_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

/// Bundled binary location for a packaged build: `<resources>/<tool>/<os>-<arch>/<tool>[.exe]`.
pub fn bundled_path(resources_dir: &Path, tool: &str) -> PathBuf {
    let platform = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
    resources_dir.join(tool).join(platform).join(exe_name(tool))
}

fn find_in_path(tool: &str) -> Option<PathBuf> {
    let finder = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };
    let output = Command::new(finder).arg(tool).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

fn resolve_ffmpeg(mode: &BuildMode) -> Result<PathBuf, AppError> {
    if let BuildMode::Packaged { resources_dir } = mode {
        let bundled = bundled_path(resources_dir, "ffmpeg");
        if bundled.exists() {
            return Ok(bundled);
        }
        log::warn!(
            target: "vidkit::ffmpeg::discovery",
            "Packaged build without bundled FFmpeg at {}, falling back to system install",
            bundled.display()
        );
    }

    if let Some(p) = common_paths().into_iter().find(|p| p.exists()) {
        return Ok(p);
    }
    if let Some(p) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        return Ok(p);
    }

    log::error!(
        target: "vidkit::ffmpeg::discovery",
        "FFmpeg not found in bundle, PATH or common locations"
    );
    Err(AppError::EngineNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

fn resolve_ffprobe(mode: &BuildMode, ffmpeg: &Path) -> Result<PathBuf, AppError> {
    if let BuildMode::Packaged { resources_dir } = mode {
        let bundled = bundled_path(resources_dir, "ffprobe");
        if bundled.exists() {
            return Ok(bundled);
        }
    }
    if let Some(p) = ffprobe_candidates(ffmpeg).into_iter().find(|p| p.exists()) {
        return Ok(p);
    }
    if let Some(p) = find_in_path("ffprobe").filter(|p| p.exists()) {
        return Ok(p);
    }
    Err(AppError::EngineNotFound(format!(
        "ffprobe not found next to FFmpeg ({}) or in PATH",
        ffmpeg.display()
    )))
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(exe_name(&format!("ffprobe{suffix}"))));
    }
    candidates.push(parent.join(exe_name("ffprobe")));
    candidates
}

/// Run `ffmpeg -hide_banner <flag>` and return stdout.
fn query_engine(ffmpeg: &Path, flag: &str) -> Result<String, AppError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", flag])
        .output()
        .map_err(|e| AppError::engine_failed(-1, format!("Failed to run FFmpeg {}: {}", flag, e)))?;
    if !output.status.success() {
        return Err(AppError::engine_failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Encoder names available in this FFmpeg build.
pub fn list_encoders(ffmpeg: &Path) -> Result<Vec<String>, AppError> {
    Ok(parse_encoders(&query_engine(ffmpeg, "-encoders")?))
}

/// Muxer (output format) names available in this FFmpeg build.
pub fn list_formats(ffmpeg: &Path) -> Result<Vec<String>, AppError> {
    Ok(parse_muxers(&query_engine(ffmpeg, "-formats")?))
}

/// Parse `ffmpeg -encoders`: rows after the ` ------` separator look like ` V....D libx264  desc`.
pub fn parse_encoders(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|l| {
            let mut cols = l.split_whitespace();
            let flags = cols.next()?;
            if flags.len() != 6 {
                return None;
            }
            cols.next().map(str::to_string)
        })
        .collect()
}

/// Parse `ffmpeg -formats`: rows after `--` look like ` DE mp4  desc`; keep muxers (E flag).
pub fn parse_muxers(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| l.trim() != "--")
        .skip(1)
        .filter_map(|l| {
            let (flags, rest) = (l.get(..4)?, l.get(4..)?);
            if !flags.contains('E') {
                return None;
            }
            rest.split_whitespace().next().map(str::to_string)
        })
        .flat_map(|names| {
            names
                .split(',')
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}
