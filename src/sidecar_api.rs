use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::budget::{BitrateBudget, VideoBitrate};
use crate::compressor::{ClipCompressor, ClipRequest, CompressionResult};
use crate::config::CompressSettings;
use crate::error::AppError;
use crate::ffmpeg::ffprobe::{VideoMetadata, get_video_metadata as probe_video_metadata};
use crate::ffmpeg::{CancelToken, format_args_for_display_multiline, path_to_string};
use crate::pass::{EncodeTarget, PassExecutor};
use crate::planner::Resolution;
use crate::progress::ProgressCallback;
use crate::upload::load_enabled_webhooks;

const PROTOCOL_VERSION: u8 = 1;
pub const FORCE_SOFTWARE_ENV: &str = "CLIPDROP_FORCE_SOFTWARE_ENCODING";

/// Cancel handle of the running clip job, keyed by job id.
static ACTIVE_CLIP: std::sync::LazyLock<Mutex<Option<(u64, CancelToken)>>> =
    std::sync::LazyLock::new(|| Mutex::new(None));
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg_path: Option<String>,
    pub codecs: Vec<crate::CodecInfo>,
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    let ffmpeg_path = crate::ffmpeg::discovery::get_ffmpeg_path()
        .ok()
        .map(path_to_string);
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        ffmpeg_path,
        codecs: crate::codec::all_codec_infos(),
    }
}

/// Applies `CLIPDROP_FORCE_SOFTWARE_ENCODING` on top of `settings`.
pub fn settings_from_env(settings: CompressSettings) -> CompressSettings {
    let value = std::env::var(FORCE_SOFTWARE_ENV).ok();
    if force_software_requested(value.as_deref()) {
        log::info!(
            target: "clipdrop::sidecar",
            "{} set; forcing software encoding",
            FORCE_SOFTWARE_ENV
        );
        settings.with_force_software_encoding(true)
    } else {
        settings
    }
}

fn force_software_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadataResult {
    #[serde(flatten)]
    meta: VideoMetadata,
    size_mb: f64,
}

impl From<VideoMetadata> for VideoMetadataResult {
    fn from(mut meta: VideoMetadata) -> Self {
        meta.fps = (meta.fps * 100.0).round() / 100.0;
        let size_mb = meta.size as f64 / 1024.0 / 1024.0;
        Self { meta, size_mb }
    }
}

pub fn get_video_metadata(path: &Path, settings: &CompressSettings) -> Result<VideoMetadataResult, AppError> {
    let meta = probe_video_metadata(path, settings.probe_timeout())?;
    Ok(meta.into())
}

/// Inputs for showing the commands of one tier's first attempt.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPreviewOptions {
    pub codec: Option<String>,
    #[serde(default)]
    pub start_secs: f64,
    pub duration_secs: f64,
    pub max_size: u64,
    pub resolution: Option<Resolution>,
    /// Overrides the budget: `"<n>k"`, or `"0"` for stream copy.
    pub bitrate: Option<String>,
}

pub fn preview_compress_command(
    options: &CommandPreviewOptions,
    input_path: Option<&str>,
    settings: &CompressSettings,
) -> Result<String, AppError> {
    let input = PathBuf::from(input_path.unwrap_or("<input>"));
    let output = PathBuf::from("<output>");
    let passlog = PathBuf::from("<output>.ffpass");
    let bitrate = match options.bitrate.as_deref() {
        Some(raw) => VideoBitrate::parse(raw).ok_or_else(|| {
            AppError::invalid_request(format!(
                "Invalid bitrate '{}': expected \"<kbps>k\" or \"0\"",
                raw
            ))
        })?,
        None => BitrateBudget::from_settings(settings).video_bitrate(
            options.duration_secs,
            options.max_size,
            settings.tier_safety_factor,
        ),
    };
    let target = EncodeTarget {
        input: &input,
        start_secs: options.start_secs,
        duration_secs: options.duration_secs,
        output: &output,
        passlog: &passlog,
        resolution: options.resolution,
        bitrate,
    };
    let codec = options.codec.as_deref().unwrap_or(&settings.software_codec);
    let transcoder = crate::ffmpeg::FfmpegTranscoder;
    let cancel = CancelToken::new();
    let executor = PassExecutor::new(settings, &transcoder, &cancel);
    Ok(executor
        .planned_passes(&target, codec, false)
        .iter()
        .map(|args| format!("ffmpeg\n{}", format_args_for_display_multiline(args)))
        .collect::<Vec<_>>()
        .join("\n\n"))
}

/// `clip.compress` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipJobParams {
    pub input_path: PathBuf,
    pub start_secs: f64,
    pub end_secs: f64,
    pub output_path: PathBuf,
    pub max_size: u64,
    /// Encoder name; the software codec when absent.
    pub encoder: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub destinations: Vec<String>,
    /// Webhook config file; its checked entries are appended to `destinations`.
    pub webhooks_path: Option<PathBuf>,
    pub settings: Option<CompressSettings>,
}

impl ClipJobParams {
    fn into_request(self, progress: Option<ProgressCallback>) -> ClipRequest {
        let mut destinations = self.destinations;
        if let Some(path) = self.webhooks_path.as_deref() {
            destinations.extend(load_enabled_webhooks(path));
        }
        let mut request = ClipRequest::new(
            self.input_path,
            self.start_secs,
            self.end_secs,
            self.output_path,
            self.max_size,
        )
        .with_destinations(destinations);
        request.title = self.title;
        request.progress = progress;
        request
    }
}

/// The running clip job. Its id and cancel handle stay registered until it is dropped.
#[derive(Debug)]
pub struct ClipJob {
    id: u64,
    cancel: CancelToken,
}

impl ClipJob {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ClipJob {
    fn drop(&mut self) {
        clear_active_clip(self.id);
    }
}

/// Registers a new clip job, so `cancel_clip` can reach it before any encode starts.
/// Fails while another job is registered.
pub fn begin_clip_job() -> Result<ClipJob, AppError> {
    let mut guard = ACTIVE_CLIP.lock();
    if let Some((existing, _)) = guard.as_ref() {
        return Err(AppError::invalid_request(format!(
            "Another job is already running (jobId={})",
            existing
        )));
    }
    let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
    let cancel = CancelToken::new();
    *guard = Some((id, cancel.clone()));
    Ok(ClipJob { id, cancel })
}

/// Runs one clip job under `job`'s cancel handle.
pub fn compress_clip_with_events(
    job: &ClipJob,
    mut params: ClipJobParams,
    base_settings: &CompressSettings,
    progress: Option<ProgressCallback>,
) -> CompressionResult {
    let settings = settings_from_env(params.settings.take().unwrap_or_else(|| base_settings.clone()));
    let encoder = params
        .encoder
        .take()
        .unwrap_or_else(|| settings.software_codec.clone());
    let compressor = ClipCompressor::new(settings, encoder).with_cancel_token(job.cancel.clone());
    compressor.compress(&params.into_request(progress))
}

fn clear_active_clip(job_id: u64) {
    let mut guard = ACTIVE_CLIP.lock();
    if guard.as_ref().is_some_and(|(id, _)| *id == job_id) {
        *guard = None;
    }
}

/// Cancels the running clip job if its id matches (or any job when `job_id` is None).
/// Returns the id of the cancelled job.
pub fn cancel_clip(job_id: Option<u64>) -> Result<Option<u64>, AppError> {
    let guard = ACTIVE_CLIP.lock();
    match (guard.as_ref(), job_id) {
        (None, Some(id)) => Err(AppError::invalid_request(format!("Unknown jobId: {}", id))),
        (None, None) => Ok(None),
        (Some((active, _)), Some(id)) if *active != id => {
            Err(AppError::invalid_request(format!("Unknown jobId: {}", id)))
        }
        (Some((active, token)), _) => {
            log::info!(target: "clipdrop::sidecar", "Cancelling clip job {}", active);
            token.cancel();
            Ok(Some(*active))
        }
    }
}
