use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clipdrop_core::error::AppError;
use clipdrop_core::progress::ProgressCallback;
use clipdrop_core::sidecar_api::{self, ClipJob, ClipJobParams, CommandPreviewOptions};
use clipdrop_core::{CompressSettings, CompressionResult};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

/// Optional settings file, loaded once at startup.
const SETTINGS_PATH_ENV: &str = "CLIPDROP_SETTINGS";

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
#[serde(rename_all = "camelCase", tag = "kind")]
enum MediaInspectParams {
    Metadata {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
    },
    CommandPreview {
        options: CommandPreviewOptions,
        #[serde(rename = "inputPath")]
        input_path: Option<String>,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ClipCancelParams {
    job_id: Option<u64>,
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

fn error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::Aborted => RpcErrorPayload {
            summary: "Aborted".to_string(),
            detail: "Aborted".to_string(),
        },
        AppError::FfmpegFailed { code, stderr } | AppError::OutOfMemory { code, stderr } => {
            let parsed = clipdrop_core::ffmpeg::parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn write_failure(writer: &SharedWriter, id: u64, error: RpcErrorPayload) {
    let _ = write_json_line_shared(writer, &RpcFailure { id, error });
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invalid_request(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn dispatch_sync(method: &str, params: Value, settings: &CompressSettings) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_value(sidecar_api::app_capabilities(), "app capabilities"),
        "media.inspect" => match params_from_value(params)? {
            MediaInspectParams::Metadata { input_path } => to_value(
                sidecar_api::get_video_metadata(&input_path, settings)?,
                "metadata",
            ),
            MediaInspectParams::CommandPreview {
                options,
                input_path,
            } => sidecar_api::preview_compress_command(&options, input_path.as_deref(), settings)
                .map(Value::String),
        },
        "clip.cancel" => {
            let parsed: ClipCancelParams = params_from_value(params)?;
            let cancelled = sidecar_api::cancel_clip(parsed.job_id)?;
            Ok(json!({ "cancelled": cancelled.is_some(), "jobId": cancelled }))
        }
        _ => Err(AppError::invalid_request(format!("Unknown method: {}", method))),
    }
}

fn handle_sync_request(request: RpcRequest, writer: &SharedWriter, settings: &CompressSettings) {
    match dispatch_sync(&request.method, request.params, settings) {
        Ok(result) => {
            let _ = write_json_line_shared(
                writer,
                &RpcSuccess {
                    id: request.id,
                    result,
                },
            );
        }
        Err(err) => write_failure(writer, request.id, error_payload(&err)),
    }
}

/// Parses params and registers the job on the reader thread, so a `clip.cancel`
/// read right after this request already finds it.
fn begin_clip_compress(
    request: &mut RpcRequest,
    writer: &SharedWriter,
) -> Option<(ClipJob, ClipJobParams)> {
    let params: ClipJobParams = match params_from_value(request.params.take()) {
        Ok(params) => params,
        Err(err) => {
            write_failure(writer, request.id, error_payload(&err));
            return None;
        }
    };
    match sidecar_api::begin_clip_job() {
        Ok(job) => Some((job, params)),
        Err(err) => {
            write_failure(writer, request.id, error_payload(&err));
            None
        }
    }
}

fn handle_clip_compress(
    request_id: u64,
    job: ClipJob,
    params: ClipJobParams,
    writer: &SharedWriter,
    settings: &CompressSettings,
) {
    let job_id = job.id();

    let writer_for_events = Arc::clone(writer);
    let progress: ProgressCallback = Arc::new(move |progress: u8| {
        emit_rpc_event(
            &writer_for_events,
            "clip.job.progress",
            json!({ "jobId": job_id, "progress": progress }),
        );
    });

    let result: CompressionResult =
        sidecar_api::compress_clip_with_events(&job, params, settings, Some(progress));
    drop(job);

    if result.success {
        emit_rpc_event(
            writer,
            "clip.job.complete",
            json!({ "jobId": job_id, "filePath": result.file_path, "fileSize": result.file_size }),
        );
    } else {
        emit_rpc_event(
            writer,
            "clip.job.error",
            json!({ "jobId": job_id, "summary": result.message, "detail": result.message }),
        );
    }

    match to_value(&result, "compression result") {
        Ok(mut value) => {
            if let Value::Object(map) = &mut value {
                map.insert("jobId".to_string(), json!(job_id));
            }
            let _ = write_json_line_shared(
                writer,
                &RpcSuccess {
                    id: request_id,
                    result: value,
                },
            );
        }
        Err(err) => write_failure(writer, request_id, error_payload(&err)),
    }
}

/// Drops handles of workers that already returned; the rest are joined at EOF.
fn reap_finished(workers: &mut Vec<thread::JoinHandle<()>>) {
    workers.retain(|worker| !worker.is_finished());
}

fn load_settings() -> CompressSettings {
    let Ok(path) = std::env::var(SETTINGS_PATH_ENV) else {
        return CompressSettings::default();
    };
    match CompressSettings::from_json_file(&PathBuf::from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!(
                target: "clipdrop::sidecar",
                "Ignoring settings file {}: {}",
                path,
                e
            );
            CompressSettings::default()
        }
    }
}

fn main() -> io::Result<()> {
    // Logs go to stderr; stdout carries the RPC stream.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let settings = Arc::new(load_settings());
    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                write_failure(
                    &stdout,
                    0,
                    RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_failure(
                    &stdout,
                    0,
                    RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                );
                continue;
            }
        };

        if request.method == "clip.compress" {
            let Some((job, params)) = begin_clip_compress(&mut request, &stdout) else {
                continue;
            };
            let writer = Arc::clone(&stdout);
            let settings = Arc::clone(&settings);
            let request_id = request.id;
            reap_finished(&mut workers);
            workers.push(thread::spawn(move || {
                handle_clip_compress(request_id, job, params, &writer, &settings);
            }));
        } else {
            handle_sync_request(request, &stdout, &settings);
        }
    }

    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}
