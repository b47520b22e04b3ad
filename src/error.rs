//! App error type shared by the engine binding, the job core and the sidecar boundary.
//! Implements Display and Serialize for the frontend.

use crate::ffmpeg::parse_ffmpeg_error;
use crate::jobs::JobId;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    EngineNotFound(String),

    #[error("Failed to read media metadata: {0}")]
    Probe(String),

    #[error("Invalid options: {0}")]
    Invocation(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    EngineFailed { code: i32, stderr: String },

    #[error("Job {0} is already registered")]
    DuplicateJob(JobId),

    #[error("Aborted")]
    Aborted,
}

impl AppError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn engine_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::EngineFailed {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Short, user-facing summary plus expandable detail.
    pub fn summary_and_detail(&self) -> (String, String) {
        match self {
            // Not an engine exit: spawn failures and internal errors carry their own message.
            AppError::EngineFailed { code: -1, stderr } => (stderr.clone(), stderr.clone()),
            AppError::EngineFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let detail = if payload.detail.is_empty() {
                    payload.summary.clone()
                } else {
                    payload.detail
                };
                (payload.summary, detail)
            }
            _ => {
                let text = self.to_string();
                (text.clone(), text)
            }
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::EngineFailed { .. } => {
                let (summary, detail) = self.summary_and_detail();
                let json = serde_json::json!({ "summary": summary, "detail": detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            AppError::Aborted
        } else {
            AppError::EngineFailed {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
