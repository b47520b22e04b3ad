pub mod error;
pub mod ffmpeg;
pub mod jobs;
pub mod request;
pub mod sidecar_api;
#[cfg(feature = "integration-test-api")]
pub mod test_support;
#[cfg(test)]
mod test_util;

pub use error::AppError;
pub use jobs::{Job, JobId, JobRegistry, Orchestrator, Outcome, ProgressEvent};
pub use request::{OperationKind, OperationRequest};
pub use sidecar_api::MediaService;
