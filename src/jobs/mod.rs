//! Job lifecycle: identifiers, states, progress events, outcomes and the
//! per-job event stream handed back to the caller on submission.

mod normalize;
mod orchestrator;
mod registry;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::request::OperationKind;

pub use normalize::{format_timemark, normalize_percent, normalize_progress};
pub use orchestrator::Orchestrator;
pub use registry::{CancelResult, JobHandle, JobRegistry, JobSnapshot};

/// Opaque job identifier, unique among active jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// `job-<unix millis>-<counter>`; the counter keeps ids distinct within one millisecond.
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        JobId(format!("job-{}-{}", millis, NEXT.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

/// Per-job state machine. Terminal states have no transitions out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        match self {
            JobState::Pending => next == JobState::Running,
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Normalized progress, always tagged with its job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Integer percent in 0..=100.
    pub percent: u8,
    /// Elapsed output time as `HH:MM:SS.cc`.
    pub timemark: String,
    /// Bytes written so far, when the engine reports it.
    pub target_size: Option<u64>,
}

/// Terminal result of a job. Exactly one per job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    Success { output_path: PathBuf },
    Failure { summary: String, detail: String },
    Cancelled,
}

impl Outcome {
    pub fn state(&self) -> JobState {
        match self {
            Outcome::Success { .. } => JobState::Succeeded,
            Outcome::Failure { .. } => JobState::Failed,
            Outcome::Cancelled => JobState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(ProgressEvent),
    /// Always the last event; the stream closes right after it.
    Finished(Outcome),
}

/// Receiving side of one job's event stream. Dropping it unsubscribes.
#[derive(Debug)]
pub struct JobEvents {
    rx: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<JobEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }
}

/// A submitted, running job.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub kind: OperationKind,
    pub events: JobEvents,
}

impl Job {
    /// Drive the job to its outcome, discarding progress.
    pub async fn wait(self) -> Outcome {
        self.wait_with(|_| {}).await
    }

    /// Drive the job to its outcome, handing every progress event to `on_progress`.
    pub async fn wait_with(mut self, mut on_progress: impl FnMut(ProgressEvent)) -> Outcome {
        while let Some(event) = self.events.next().await {
            match event {
                JobEvent::Progress(p) => on_progress(p),
                JobEvent::Finished(outcome) => return outcome,
            }
        }
        log::error!(
            target: "vidkit::jobs",
            "Job {} event stream closed without an outcome",
            self.id
        );
        Outcome::Failure {
            summary: "Job ended unexpectedly.".to_string(),
            detail: format!("Job {} stopped without reporting an outcome", self.id),
        }
    }
}
