use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use vidkit_core::error::AppError;
use vidkit_core::jobs::{Job, JobEvent, JobId, Outcome, ProgressEvent};
use vidkit_core::request::{
    CompressOptions, ConvertOptions, ExtractAudioOptions, OperationKind, OperationRequest,
};
use vidkit_core::sidecar_api::MediaService;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum MediaProcessParams {
    Compress {
        input_path: PathBuf,
        output_path: PathBuf,
        #[serde(default)]
        options: CompressOptions,
        job_id: Option<JobId>,
        duration_secs: Option<f64>,
    },
    Convert {
        input_path: PathBuf,
        output_path: PathBuf,
        #[serde(default)]
        options: ConvertOptions,
        job_id: Option<JobId>,
        duration_secs: Option<f64>,
    },
    ExtractAudio {
        input_path: PathBuf,
        output_path: PathBuf,
        #[serde(default)]
        options: ExtractAudioOptions,
        job_id: Option<JobId>,
        duration_secs: Option<f64>,
    },
}

impl MediaProcessParams {
    fn into_request(self) -> OperationRequest {
        let (request, job_id, duration_secs) = match self {
            MediaProcessParams::Compress {
                input_path,
                output_path,
                options,
                job_id,
                duration_secs,
            } => (
                OperationRequest::compress(input_path, output_path, options),
                job_id,
                duration_secs,
            ),
            MediaProcessParams::Convert {
                input_path,
                output_path,
                options,
                job_id,
                duration_secs,
            } => (
                OperationRequest::convert(input_path, output_path, options),
                job_id,
                duration_secs,
            ),
            MediaProcessParams::ExtractAudio {
                input_path,
                output_path,
                options,
                job_id,
                duration_secs,
            } => (
                OperationRequest::extract_audio(input_path, output_path, options),
                job_id,
                duration_secs,
            ),
        };
        let request = match job_id {
            Some(id) => request.with_job_id(id),
            None => request,
        };
        match duration_secs {
            Some(secs) => request.with_duration(secs),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum MediaInspectParams {
    Metadata { input_path: PathBuf },
    CommandPreview { operation: MediaProcessParams },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaCancelParams {
    job_id: JobId,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn emit_job_progress(writer: &SharedWriter, kind: OperationKind, progress: &ProgressEvent) {
    emit_rpc_event(
        writer,
        "media.job.progress",
        json!({
            "jobId": progress.job_id,
            "kind": kind,
            "percent": progress.percent,
            "timemark": progress.timemark,
            "targetSize": progress.target_size,
        }),
    );
}

fn emit_job_outcome(writer: &SharedWriter, job_id: &JobId, kind: OperationKind, outcome: &Outcome) {
    match outcome {
        Outcome::Success { output_path } => emit_rpc_event(
            writer,
            "media.job.complete",
            json!({
                "jobId": job_id,
                "kind": kind,
                "outputPath": output_path,
            }),
        ),
        Outcome::Failure { summary, detail } => emit_rpc_event(
            writer,
            "media.job.error",
            json!({
                "jobId": job_id,
                "kind": kind,
                "summary": summary,
                "detail": detail,
            }),
        ),
        Outcome::Cancelled => emit_rpc_event(
            writer,
            "media.job.cancelled",
            json!({
                "jobId": job_id,
                "kind": kind,
            }),
        ),
    }
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    let (summary, detail) = err.summary_and_detail();
    RpcErrorPayload { summary, detail }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invocation(format!("Invalid params payload: {}", e)))
}

fn to_json<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: parse_error_payload(&err),
            },
        ),
    };
    if let Err(err) = written {
        log::error!(
            target: "vidkit::sidecar",
            "Failed to write response {}: {}",
            id,
            err
        );
    }
}

/// Engine resolution is retried on each request until it succeeds once.
#[derive(Default)]
struct ServiceSlot {
    service: Mutex<Option<Arc<MediaService>>>,
}

impl ServiceSlot {
    fn get(&self) -> Result<Arc<MediaService>, AppError> {
        let mut guard = self.service.lock();
        if let Some(service) = guard.as_ref() {
            return Ok(Arc::clone(service));
        }
        let service = Arc::new(MediaService::from_environment()?);
        *guard = Some(Arc::clone(&service));
        Ok(service)
    }

    /// The service if it was already resolved; never triggers resolution.
    fn existing(&self) -> Option<Arc<MediaService>> {
        self.service.lock().as_ref().map(Arc::clone)
    }

    fn shutdown(&self) {
        if let Some(service) = self.service.lock().as_ref() {
            service.shutdown();
        }
    }
}

fn handle_request(
    request: RpcRequest,
    writer: &SharedWriter,
    slot: &Arc<ServiceSlot>,
    tasks: &mut JoinSet<()>,
) {
    let id = request.id;
    log::debug!(
        target: "vidkit::sidecar",
        "request {}: {}",
        id,
        request.method
    );
    // No resolved engine means no job was ever started, so there is nothing to cancel.
    if request.method == "media.cancel" {
        let result = params_from_value::<MediaCancelParams>(request.params)
            .map(|params| cancel_job(slot, &params.job_id));
        respond(writer, id, result);
        return;
    }
    let service = match slot.get() {
        Ok(service) => service,
        Err(err) => {
            respond(writer, id, Err(err));
            return;
        }
    };

    match request.method.as_str() {
        "app.capabilities" => {
            let writer = Arc::clone(writer);
            tasks.spawn(async move {
                let result = tokio::task::spawn_blocking(move || service.capabilities())
                    .await
                    .map_err(|e| AppError::from(format!("Capabilities task failed: {}", e)))
                    .and_then(|r| r)
                    .and_then(|caps| to_json(caps, "app capabilities"));
                respond(&writer, id, result);
            });
        }
        "media.inspect" => match params_from_value(request.params) {
            Ok(MediaInspectParams::Metadata { input_path }) => {
                let writer = Arc::clone(writer);
                tasks.spawn(async move {
                    let result = service
                        .probe_metadata(&input_path)
                        .await
                        .and_then(|meta| to_json(meta, "metadata"));
                    respond(&writer, id, result);
                });
            }
            Ok(MediaInspectParams::CommandPreview { operation }) => {
                let result = service
                    .preview_command(&operation.into_request())
                    .map(Value::String);
                respond(writer, id, result);
            }
            Err(err) => respond(writer, id, Err(err)),
        },
        "media.process" => {
            let submitted = params_from_value::<MediaProcessParams>(request.params)
                .and_then(|params| service.submit(params.into_request()));
            match submitted {
                Ok(job) => {
                    let writer = Arc::clone(writer);
                    tasks.spawn(forward_job(id, job, writer));
                }
                Err(err) => respond(writer, id, Err(err)),
            }
        }
        other => respond(
            writer,
            id,
            Err(AppError::invocation(format!("Unknown method: {}", other))),
        ),
    }
}

fn cancel_job(slot: &ServiceSlot, job_id: &JobId) -> Value {
    let cancelled = slot
        .existing()
        .is_some_and(|service| service.cancel(job_id));
    json!({ "cancelled": cancelled, "jobId": job_id })
}

/// Relay one job's events, then answer the originating request with its outcome.
async fn forward_job(request_id: u64, mut job: Job, writer: SharedWriter) {
    let kind = job.kind;
    let mut outcome = None;
    while let Some(event) = job.events.next().await {
        match event {
            JobEvent::Progress(progress) => emit_job_progress(&writer, kind, &progress),
            JobEvent::Finished(finished) => {
                emit_job_outcome(&writer, &job.id, kind, &finished);
                outcome = Some(finished);
            }
        }
    }
    let result = match outcome {
        Some(outcome) => Ok(json!({ "jobId": job.id, "outcome": outcome })),
        None => Err(AppError::from(format!(
            "Job {} ended without an outcome",
            job.id
        ))),
    };
    respond(&writer, request_id, result);
}

fn init_logging() {
    let mut builder = env_logger::Builder::new();
    #[cfg(debug_assertions)]
    builder.filter_level(log::LevelFilter::Debug);
    #[cfg(not(debug_assertions))]
    builder.filter_level(log::LevelFilter::Info);
    builder
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            let target = record
                .target()
                .strip_prefix("vidkit::")
                .unwrap_or(record.target());
            writeln!(
                buf,
                "{}  {:5}  {}  {}",
                buf.timestamp_seconds(),
                record.level(),
                target,
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> io::Result<()> {
    init_logging();

    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let slot = Arc::new(ServiceSlot::default());
    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        handle_request(request, &stdout, &slot, &mut tasks);

        // Reap finished request tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
    }

    log::info!(target: "vidkit::sidecar", "stdin closed; shutting down");
    slot.shutdown();
    while tasks.join_next().await.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_before_engine_resolution_is_a_no_op() {
        let slot = ServiceSlot::default();
        let params: MediaCancelParams = params_from_value(json!({ "jobId": "ui-7" })).unwrap();
        assert_eq!(
            cancel_job(&slot, &params.job_id),
            json!({ "cancelled": false, "jobId": "ui-7" })
        );
        assert!(slot.existing().is_none());
    }

    #[test]
    fn cancel_of_unknown_job_on_resolved_engine_is_a_no_op() {
        let slot = ServiceSlot::default();
        *slot.service.lock() = Some(Arc::new(MediaService::new(
            vidkit_core::ffmpeg::EnginePaths::new("/x/ffmpeg", "/x/ffprobe"),
        )));
        assert_eq!(
            cancel_job(&slot, &JobId::from("missing")),
            json!({ "cancelled": false, "jobId": "missing" })
        );
    }
}
