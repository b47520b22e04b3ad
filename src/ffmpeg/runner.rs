//! FFmpeg process spawning and progress streaming.
//!
//! Spawns FFmpeg as a child process and hands it to a driver task that owns
//! the child for its whole life. The driver reads progress blocks from stdout
//! (pipe:1) and the duration banner from stderr line by line (decoded lossily), forwards raw
//! progress over a channel, and finishes with exactly one `Exited` event. A
//! kill request makes the driver kill and reap the child, so nothing is left
//! behind as a zombie.

use std::borrow::Cow;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use super::progress::{ProgressParser, RawProgress};
use crate::error::AppError;

/// Minimum interval between progress emits to reduce IPC and UI re-renders.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Lifecycle events of one engine process. `Exited` is always last.
#[derive(Debug)]
pub enum EngineEvent {
    Progress(RawProgress),
    Exited(Result<(), AppError>),
}

/// Kill switch for a running engine process. Owned by the job registry.
/// Dropping the handle stops the process as well.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the driver to kill the process. Idempotent; a no-op once exited.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// A handle with no process behind it; the receiver observes kill requests.
    #[cfg(test)]
    pub(crate) fn detached(pid: u32) -> (Self, oneshot::Receiver<()>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        (
            Self {
                pid: Some(pid),
                kill_tx: Some(kill_tx),
            },
            kill_rx,
        )
    }
}

/// A spawned engine: its kill switch and its event stream.
pub struct EngineProcess {
    pub handle: ProcessHandle,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Spawn FFmpeg with `args`. Must be called from within a tokio runtime.
///
/// - `duration_secs`: when known up front, progress percent is available from the
///   first block instead of waiting for the `Duration:` banner on stderr.
pub fn spawn_engine(
    ffmpeg: &Path,
    args: &[String],
    duration_secs: Option<f64>,
) -> Result<EngineProcess, AppError> {
    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "vidkit::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let child = cmd
        .spawn()
        .map_err(|e| AppError::engine_failed(-1, format!("Failed to spawn FFmpeg: {}", e)))?;

    let pid = child.id();
    let (kill_tx, kill_rx) = oneshot::channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(drive(child, duration_secs, kill_rx, event_tx));

    Ok(EngineProcess {
        handle: ProcessHandle {
            pid,
            kill_tx: Some(kill_tx),
        },
        events: event_rx,
    })
}

/// One raw output line as text. Engine output is not guaranteed UTF-8 (metadata
/// tags, file names), so invalid bytes are replaced instead of ending the stream.
fn decode_line(buf: &[u8]) -> Cow<'_, str> {
    match String::from_utf8_lossy(buf) {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim_end_matches(['\n', '\r'])),
        Cow::Owned(s) => Cow::Owned(s.trim_end_matches(['\n', '\r']).to_string()),
    }
}

/// Push a stderr line into the bounded tail buffer.
fn push_stderr_tail(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > MAX_STDERR_BYTES {
        let mut cut = tail.len() - MAX_STDERR_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

async fn drive(
    mut child: Child,
    duration_secs: Option<f64>,
    mut kill_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.start_kill();
        let _ = child.wait().await;
        let _ = events.send(EngineEvent::Exited(Err(AppError::from(
            "Failed to capture FFmpeg output streams",
        ))));
        return;
    };

    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    // Partial lines survive a cancelled read_until, so the buffers live outside the loop.
    let mut stdout_buf = Vec::with_capacity(256);
    let mut stderr_buf = Vec::with_capacity(256);
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut parser = ProgressParser::new(duration_secs);
    let mut stderr_tail = String::new();
    let mut last_emit: Option<Instant> = None;
    let mut last_percent = f64::NEG_INFINITY;
    let mut killed = false;

    while stdout_open || stderr_open {
        tokio::select! {
            biased;
            _ = &mut kill_rx => {
                killed = true;
                break;
            }
            read = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => match read {
                Ok(0) | Err(_) => stdout_open = false,
                Ok(_) => {
                    let progress = parser.feed_progress_line(&decode_line(&stdout_buf));
                    stdout_buf.clear();
                    if let Some(progress) = progress {
                        let now = Instant::now();
                        let percent = progress.percent.unwrap_or(0.0);
                        let should_emit = last_emit
                            .is_none_or(|t| now.duration_since(t) >= PROGRESS_EMIT_INTERVAL)
                            || (percent - last_percent).abs() >= 1.0
                            || percent >= 100.0;
                        if should_emit {
                            last_emit = Some(now);
                            last_percent = percent;
                            let _ = events.send(EngineEvent::Progress(progress));
                        }
                    }
                }
            },
            read = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => match read {
                Ok(0) | Err(_) => stderr_open = false,
                Ok(_) => {
                    {
                        let line = decode_line(&stderr_buf);
                        parser.feed_stderr_line(&line);
                        push_stderr_tail(&mut stderr_tail, &line);
                    }
                    stderr_buf.clear();
                }
            },
        }
    }

    if killed {
        log::warn!(
            target: "vidkit::ffmpeg::runner",
            "Killing FFmpeg process (pid={:?})",
            child.id()
        );
        let _ = child.start_kill();
        let _ = child.wait().await;
        let _ = events.send(EngineEvent::Exited(Err(AppError::aborted())));
        return;
    }

    // Both pipes closed; the process is exiting on its own. A kill request may
    // still arrive while we wait, and is honoured.
    let status = tokio::select! {
        biased;
        _ = &mut kill_rx => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = events.send(EngineEvent::Exited(Err(AppError::aborted())));
            return;
        }
        status = child.wait() => status,
    };

    let result = match status {
        Ok(status) if status.success() => {
            log::info!(
                target: "vidkit::ffmpeg::runner",
                "FFmpeg completed successfully"
            );
            Ok(())
        }
        Ok(status) => {
            // Killed by a signal we did not send: report it like FFmpeg's own interrupt exit.
            let code = status.code().unwrap_or(255);
            let err_preview = stderr_tail
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .join("; ");
            log::error!(
                target: "vidkit::ffmpeg::runner",
                "FFmpeg failed (code={}): {}",
                code,
                err_preview
            );
            Err(AppError::engine_failed(code, stderr_tail))
        }
        Err(e) => Err(AppError::from(e)),
    };
    let _ = events.send(EngineEvent::Exited(result));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_util::{
        HANG_SCRIPT, NO_AUDIO_SCRIPT, NON_UTF8_STDERR_SCRIPT, SUCCESS_SCRIPT, fake_engine,
    };

    async fn collect(
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> (Vec<RawProgress>, Result<(), AppError>) {
        let mut progress = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Progress(p) => progress.push(p),
                EngineEvent::Exited(result) => return (progress, result),
            }
        }
        panic!("event stream closed without Exited");
    }

    #[tokio::test]
    async fn streams_progress_then_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), SUCCESS_SCRIPT);
        let proc = spawn_engine(&engine, &[], None).unwrap();
        let (progress, result) = collect(proc.events).await;
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(progress.last().and_then(|p| p.percent), Some(100.0));
        assert!(!progress.is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), NO_AUDIO_SCRIPT);
        let proc = spawn_engine(&engine, &[], None).unwrap();
        let (_, result) = collect(proc.events).await;
        match result {
            Err(AppError::EngineFailed { code, stderr }) => {
                assert_eq!(code, 1);
                assert!(stderr.contains("matches no streams"));
            }
            other => panic!("expected EngineFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn kill_reports_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), HANG_SCRIPT);
        let mut proc = spawn_engine(&engine, &[], None).unwrap();
        assert!(proc.handle.pid().is_some());
        proc.handle.kill();
        proc.handle.kill();
        let (_, result) = collect(proc.events).await;
        assert!(matches!(result, Err(AppError::Aborted)));
    }

    #[tokio::test]
    async fn missing_executable_fails_to_spawn() {
        let err = spawn_engine(Path::new("/no/such/ffmpeg"), &[], None)
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, AppError::EngineFailed { code: -1, .. }));
    }

    #[tokio::test]
    async fn non_utf8_stderr_keeps_draining_until_exit() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), NON_UTF8_STDERR_SCRIPT);
        let proc = spawn_engine(&engine, &[], None).unwrap();
        let (progress, result) =
            tokio::time::timeout(Duration::from_secs(10), collect(proc.events))
                .await
                .expect("engine output must be drained to exit");
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(progress.last().and_then(|p| p.percent), Some(100.0));
    }

    #[test]
    fn decode_line_replaces_invalid_bytes_and_strips_newline() {
        assert_eq!(decode_line(b"    title : caf\xe9\r\n"), "    title : caf\u{FFFD}");
        assert_eq!(decode_line(b"progress=end\n"), "progress=end");
        assert_eq!(decode_line(b"no newline"), "no newline");
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let mut tail = String::new();
        let line = "x".repeat(1024);
        for _ in 0..100 {
            push_stderr_tail(&mut tail, &line);
        }
        assert!(tail.len() <= MAX_STDERR_BYTES);
    }
}
