//! Turns operation requests into running jobs and drives each one to exactly
//! one outcome.
//!
//! `submit` validates, builds the invocation, spawns the engine and registers
//! the job before returning; a job is never Running without a registry entry.
//! One task per job then forwards normalized progress and settles the outcome.
//! Cancellation wins every race: when the engine exits, the task removes its
//! own registry entry, and finding it already gone means a cancel got there
//! first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};

use super::{
    CancelResult, Job, JobEvent, JobEvents, JobHandle, JobId, JobRegistry, JobState, Outcome,
    normalize_progress,
};
use crate::error::AppError;
use crate::ffmpeg::{EngineEvent, EnginePaths, EngineProcess, build_invocation, spawn_engine};
use crate::request::OperationRequest;

pub struct Orchestrator {
    engine: EnginePaths,
    registry: Arc<JobRegistry>,
}

impl Orchestrator {
    pub fn new(engine: EnginePaths, registry: Arc<JobRegistry>) -> Self {
        Self { engine, registry }
    }

    pub fn engine(&self) -> &EnginePaths {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Start a job. Must be called from within a tokio runtime.
    ///
    /// Errors here mean nothing was left running and no outcome will follow.
    pub fn submit(&self, request: OperationRequest) -> Result<Job, AppError> {
        request.validate()?;
        let invocation = build_invocation(&request)?;
        let id = request.job_id.clone().unwrap_or_else(JobId::generate);
        if self.registry.contains(&id) {
            return Err(AppError::DuplicateJob(id));
        }
        log::info!(
            target: "vidkit::jobs::orchestrator",
            "Job {} ({}) {:?}: {} -> {}",
            id,
            invocation.kind,
            JobState::Pending,
            request.input_path.display(),
            request.output_path.display()
        );

        let output = OutputGuard::capture(&request.output_path);
        let EngineProcess { handle, events } =
            spawn_engine(&self.engine.ffmpeg, &invocation.args, request.duration_secs)?;
        let (job_handle, cancel_rx) = JobHandle::new(handle, invocation.kind);
        self.registry.register(id.clone(), job_handle)?;

        let mut state = JobState::Pending;
        advance(&id, &mut state, JobState::Running);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_job(JobTask {
            id: id.clone(),
            state,
            output,
            registry: Arc::clone(&self.registry),
            engine: events,
            cancel_rx,
            events: tx,
        }));

        Ok(Job {
            id,
            kind: invocation.kind,
            events: JobEvents::new(rx),
        })
    }

    /// Submit and wait for the outcome.
    pub async fn run(&self, request: OperationRequest) -> Result<Outcome, AppError> {
        Ok(self.submit(request)?.wait().await)
    }

    pub fn cancel(&self, id: &JobId) -> CancelResult {
        self.registry.cancel(id)
    }

    /// Cancel every active job.
    pub fn shutdown(&self) -> usize {
        let count = self.registry.cancel_all();
        if count > 0 {
            log::info!(
                target: "vidkit::jobs::orchestrator",
                "Shutdown cancelled {} active job(s)",
                count
            );
        }
        count
    }
}

fn advance(id: &JobId, state: &mut JobState, next: JobState) {
    if state.can_transition_to(next) {
        log::debug!(
            target: "vidkit::jobs::orchestrator",
            "Job {}: {:?} -> {:?}",
            id,
            state,
            next
        );
        *state = next;
    } else {
        log::warn!(
            target: "vidkit::jobs::orchestrator",
            "Job {}: ignoring transition {:?} -> {:?}",
            id,
            state,
            next
        );
    }
}

/// Output path plus what was there before the job started, so cleanup only
/// removes files the engine wrote.
struct OutputGuard {
    path: PathBuf,
    baseline: Option<(Option<SystemTime>, u64)>,
}

impl OutputGuard {
    fn capture(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            baseline: Self::fingerprint(path),
        }
    }

    fn fingerprint(path: &Path) -> Option<(Option<SystemTime>, u64)> {
        let meta = std::fs::metadata(path).ok()?;
        Some((meta.modified().ok(), meta.len()))
    }

    /// Delete the output if the engine created or touched it. Errors are ignored.
    async fn remove_partial(&self) {
        let Some(current) = Self::fingerprint(&self.path) else {
            return;
        };
        if self.baseline == Some(current) {
            return;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => log::debug!(
                target: "vidkit::jobs::orchestrator",
                "Removed partial output {}",
                self.path.display()
            ),
            Err(e) => log::debug!(
                target: "vidkit::jobs::orchestrator",
                "Could not remove partial output {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Outcome for an engine exit. An entry already gone from the registry means a
/// cancel removed it first, and that takes precedence over whatever the exit said.
fn settle(result: Result<(), AppError>, still_registered: bool, output_path: &Path) -> Outcome {
    if !still_registered {
        return Outcome::Cancelled;
    }
    match result {
        Ok(()) => Outcome::Success {
            output_path: output_path.to_path_buf(),
        },
        Err(e) => {
            let (summary, detail) = e.summary_and_detail();
            Outcome::Failure { summary, detail }
        }
    }
}

struct JobTask {
    id: JobId,
    state: JobState,
    output: OutputGuard,
    registry: Arc<JobRegistry>,
    engine: mpsc::UnboundedReceiver<EngineEvent>,
    cancel_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<JobEvent>,
}

async fn run_job(task: JobTask) {
    let JobTask {
        id,
        mut state,
        output,
        registry,
        mut engine,
        mut cancel_rx,
        events,
    } = task;

    let mut cancel_armed = true;
    // `None` means the registry cancelled us while the engine was still running.
    let exit = loop {
        tokio::select! {
            biased;
            notified = &mut cancel_rx, if cancel_armed => {
                cancel_armed = false;
                if notified.is_ok() {
                    break None;
                }
            }
            event = engine.recv() => match event {
                Some(EngineEvent::Progress(raw)) => {
                    let _ = events.send(JobEvent::Progress(normalize_progress(&id, &raw)));
                }
                Some(EngineEvent::Exited(result)) => break Some(result),
                None => break Some(Err(AppError::from("FFmpeg driver stopped without an exit status"))),
            },
        }
    };

    let awaiting_exit = exit.is_none();
    let outcome = match exit {
        None => Outcome::Cancelled,
        Some(result) => settle(result, registry.remove(&id).is_some(), &output.path),
    };

    advance(&id, &mut state, outcome.state());
    if !outcome.is_success() {
        output.remove_partial().await;
    }
    match &outcome {
        Outcome::Success { output_path } => log::info!(
            target: "vidkit::jobs::orchestrator",
            "Job {} succeeded: {}",
            id,
            output_path.display()
        ),
        Outcome::Failure { summary, .. } => log::warn!(
            target: "vidkit::jobs::orchestrator",
            "Job {} failed: {}",
            id,
            summary
        ),
        Outcome::Cancelled => log::info!(
            target: "vidkit::jobs::orchestrator",
            "Job {} cancelled",
            id
        ),
    }
    let _ = events.send(JobEvent::Finished(outcome));
    drop(events);

    // Cancelled before the engine exited: wait for the kill to land, then
    // clean up anything written in the meantime.
    if awaiting_exit {
        while let Some(event) = engine.recv().await {
            if matches!(event, EngineEvent::Exited(_)) {
                break;
            }
        }
        output.remove_partial().await;
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.engine)
            .field("active_jobs", &self.registry.len())
            .finish()
    }
}
