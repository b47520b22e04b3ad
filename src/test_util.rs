//! Shared test helpers for unit tests.
//!
//! Layout: unit tests live in each module (error, request, ffmpeg/*, jobs/*);
//! orchestrator and boundary tests drive a fake engine written by
//! [`fake_engine`]; tests against a real FFmpeg live under `tests/` and need
//! `--features integration-test-api`.

use std::path::{Path, PathBuf};

use crate::ffmpeg::EnginePaths;

/// Writes an executable `/bin/sh` script standing in for FFmpeg and returns its path.
/// The script ignores its arguments; `body` decides what it prints and how it exits.
/// Use `exec sleep N` for long-running engines so a kill reaches the sleeping process.
#[cfg(unix)]
pub fn fake_engine(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(format!("fake-ffmpeg-{}", next_script_id()));
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("write fake engine");
    let mut perms = std::fs::metadata(&path).expect("stat fake engine").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod fake engine");
    path
}

#[cfg(unix)]
fn next_script_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Engine paths where ffmpeg is the given script and ffprobe does not matter.
pub fn engine_paths(ffmpeg: &Path) -> EnginePaths {
    EnginePaths::new(ffmpeg, ffmpeg.with_file_name("ffprobe-unused"))
}

/// Progress script: reports a 10 s input in four blocks, then succeeds.
pub const SUCCESS_SCRIPT: &str = r#"
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
for t in 2500000 5000000 7500000; do
  echo "out_time_us=$t"
  echo "total_size=$t"
  echo "progress=continue"
done
echo "out_time_us=10000000"
echo "progress=end"
exit 0
"#;

/// Progress script: one block, then hangs until killed.
pub const HANG_SCRIPT: &str = r#"
echo "  Duration: 00:00:10.00, start: 0.000000" >&2
echo "out_time_us=1000000"
echo "progress=continue"
exec sleep 30
"#;

/// Prints a Latin-1 metadata tag, then far more stderr than a pipe buffer holds, then succeeds.
pub const NON_UTF8_STDERR_SCRIPT: &str = r#"
echo "  Duration: 00:00:10.00, start: 0.000000" >&2
printf '    title : caf\351\n' >&2
i=0
while [ $i -lt 4000 ]; do
  echo "[mp4 @ 0x0] Non-monotonic DTS in output stream 0:0; previous: 1, current: 0; changing to 2" >&2
  i=$((i + 1))
done
echo "out_time_us=10000000"
echo "progress=end"
exit 0
"#;

/// Fails like FFmpeg does on a video-only input asked for its audio stream.
pub const NO_AUDIO_SCRIPT: &str = r#"
echo "Stream map '0:a:0' matches no streams." >&2
echo "To ignore this, add a trailing '?' to the map." >&2
exit 1
"#;

/// Writes a partial file at the output path (the last argument), reports once, then hangs.
pub const PARTIAL_HANG_SCRIPT: &str = r#"
for last; do :; done
echo partial > "$last"
echo "  Duration: 00:00:10.00, start: 0.000000" >&2
echo "out_time_us=1000000"
echo "progress=continue"
exec sleep 30
"#;

/// Writes a partial file at the output path, then fails like a full disk.
pub const PARTIAL_FAIL_SCRIPT: &str = r#"
for last; do :; done
echo partial > "$last"
echo "av_interleaved_write_frame(): No space left on device" >&2
exit 1
"#;
