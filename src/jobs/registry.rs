//! Active job registry. The only shared mutable state in the core.
//!
//! Every operation takes the same lock, so register, cancel and remove on one
//! id are serialized. Whoever removes an entry owns its handle; a cancel and a
//! natural exit racing on the same id can therefore never both act on it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::JobId;
use crate::error::AppError;
use crate::ffmpeg::ProcessHandle;
use crate::request::OperationKind;

/// What the registry owns for one running job.
#[derive(Debug)]
pub struct JobHandle {
    process: ProcessHandle,
    kind: OperationKind,
    cancel_notify: Option<oneshot::Sender<()>>,
    started_at: Instant,
}

impl JobHandle {
    /// Wraps a process; the receiver fires when the job is cancelled through the registry.
    pub fn new(process: ProcessHandle, kind: OperationKind) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                process,
                kind,
                cancel_notify: Some(tx),
                started_at: Instant::now(),
            },
            rx,
        )
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    fn terminate(mut self) {
        self.process.kill();
        if let Some(tx) = self.cancel_notify.take() {
            let _ = tx.send(());
        }
    }
}

/// Point-in-time view of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSnapshot {
    pub pid: Option<u32>,
    pub kind: OperationKind,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled,
    NotFound,
}

impl CancelResult {
    pub fn effected(self) -> bool {
        self == CancelResult::Cancelled
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job. On a duplicate id the new process is killed and
    /// the existing entry is left untouched.
    pub fn register(&self, id: JobId, handle: JobHandle) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&id) {
            drop(jobs);
            log::warn!(
                target: "vidkit::jobs::registry",
                "Duplicate job id {}; killing the new process",
                id
            );
            let mut handle = handle;
            handle.process.kill();
            return Err(AppError::DuplicateJob(id));
        }
        log::debug!(
            target: "vidkit::jobs::registry",
            "register: id={}, kind={}, pid={:?}",
            id,
            handle.kind,
            handle.process.pid()
        );
        jobs.insert(id, handle);
        Ok(())
    }

    pub fn lookup(&self, id: &JobId) -> Option<JobSnapshot> {
        self.jobs.lock().get(id).map(|h| JobSnapshot {
            pid: h.process.pid(),
            kind: h.kind,
            elapsed: h.started_at.elapsed(),
        })
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.lock().contains_key(id)
    }

    /// Remove the entry and kill its process. Unknown or finished ids are a no-op.
    pub fn cancel(&self, id: &JobId) -> CancelResult {
        let removed = self.jobs.lock().remove(id);
        match removed {
            Some(handle) => {
                log::info!(
                    target: "vidkit::jobs::registry",
                    "cancel: id={}, kind={}, pid={:?}",
                    id,
                    handle.kind,
                    handle.process.pid()
                );
                handle.terminate();
                CancelResult::Cancelled
            }
            None => {
                log::debug!(
                    target: "vidkit::jobs::registry",
                    "cancel: id={} not active",
                    id
                );
                CancelResult::NotFound
            }
        }
    }

    /// Remove without killing. Idempotent; `None` when already gone.
    pub fn remove(&self, id: &JobId) -> Option<JobHandle> {
        self.jobs.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn active_ids(&self) -> Vec<JobId> {
        self.jobs.lock().keys().cloned().collect()
    }

    /// Cancel every active job. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(JobId, JobHandle)> = self.jobs.lock().drain().collect();
        let count = drained.len();
        for (id, handle) in drained {
            log::info!(
                target: "vidkit::jobs::registry",
                "cancel_all: terminating {}",
                id
            );
            handle.terminate();
        }
        count
    }
}
