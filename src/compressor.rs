//! `ClipCompressor::compress`: the caller-facing entry point. Runs tier planning,
//! the tier loop, size recovery and upload, and always returns a
//! `CompressionResult` rather than an error.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::CompressSettings;
use crate::error::AppError;
use crate::ffmpeg::temp::{TempFiles, prepare_output_path, remove_if_exists};
use crate::ffmpeg::{
    CancelToken, FfmpegTranscoder, FfprobeResolutionProbe, ResolutionProbe, Transcoder,
};
use crate::orchestrator::{ClipSource, EncodeOrchestrator};
use crate::pass::PassExecutor;
use crate::planner::plan_tiers;
use crate::progress::{PhasePlan, ProgressAggregator, ProgressCallback};
use crate::recovery::{RecoveryOutcome, SizeRecovery};
use crate::upload::{DiscordWebhookSink, UploadSink};

const MB: f64 = 1024.0 * 1024.0;

/// One clip to cut and compress.
#[derive(Clone)]
pub struct ClipRequest {
    pub input: PathBuf,
    pub start_secs: f64,
    pub end_secs: f64,
    pub output: PathBuf,
    pub max_size: u64,
    pub destinations: Vec<String>,
    pub title: Option<String>,
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for ClipRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipRequest")
            .field("input", &self.input)
            .field("start_secs", &self.start_secs)
            .field("end_secs", &self.end_secs)
            .field("output", &self.output)
            .field("max_size", &self.max_size)
            .field("destinations", &self.destinations.len())
            .field("title", &self.title)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ClipRequest {
    pub fn new(
        input: impl Into<PathBuf>,
        start_secs: f64,
        end_secs: f64,
        output: impl Into<PathBuf>,
        max_size: u64,
    ) -> Self {
        Self {
            input: input.into(),
            start_secs,
            end_secs,
            output: output.into(),
            max_size,
            destinations: Vec::new(),
            title: None,
            progress: None,
        }
    }

    pub fn with_destinations(mut self, destinations: Vec<String>) -> Self {
        self.destinations = destinations;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// `end - start`, rounded to milliseconds.
    pub fn duration_secs(&self) -> f64 {
        ((self.end_secs - self.start_secs) * 1000.0).round() / 1000.0
    }

    fn validate(&self) -> Result<f64, AppError> {
        if !self.start_secs.is_finite() || !self.end_secs.is_finite() || self.start_secs < 0.0 {
            return Err(AppError::invalid_request(format!(
                "invalid clip range {}..{}",
                self.start_secs, self.end_secs
            )));
        }
        let duration = self.duration_secs();
        if duration <= 0.0 {
            return Err(AppError::invalid_request(
                "Clip duration must be positive for compression",
            ));
        }
        if self.max_size == 0 {
            return Err(AppError::invalid_request("max size must be positive"));
        }
        Ok(duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    /// A file was produced (it may still exceed the limit; see `within_limit`).
    pub success: bool,
    pub message: String,
    pub file_path: Option<PathBuf>,
    pub file_size: u64,
    pub within_limit: bool,
    /// Label of the tier the output came from.
    pub tier: Option<String>,
    pub recompressed: bool,
    pub webhook_success: bool,
    /// Per destination, in request order.
    pub destination_results: Vec<bool>,
}

impl CompressionResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            file_path: None,
            file_size: 0,
            within_limit: false,
            tier: None,
            recompressed: false,
            webhook_success: false,
            destination_results: Vec::new(),
        }
    }
}

/// Reusable pipeline configured with settings and the resolved encoder name.
///
/// All cancellation goes through one `CancelToken`; once cancelled, later calls
/// abort immediately. Use a fresh compressor per job when jobs are cancellable.
pub struct ClipCompressor {
    settings: CompressSettings,
    encoder: String,
    transcoder: Arc<dyn Transcoder>,
    probe: Arc<dyn ResolutionProbe>,
    uploader: Arc<dyn UploadSink>,
    cancel: CancelToken,
}

impl ClipCompressor {
    pub fn new(settings: CompressSettings, encoder: impl Into<String>) -> Self {
        let probe = FfprobeResolutionProbe::new(settings.probe_timeout());
        Self {
            settings,
            encoder: encoder.into(),
            transcoder: Arc::new(FfmpegTranscoder),
            probe: Arc::new(probe),
            uploader: Arc::new(DiscordWebhookSink::default()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResolutionProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn UploadSink>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &CompressSettings {
        &self.settings
    }

    pub fn encoder(&self) -> &str {
        &self.encoder
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Blocking. Progress is delivered on the calling thread.
    pub fn compress(&self, request: &ClipRequest) -> CompressionResult {
        log::info!(
            target: "clipdrop::compressor",
            "Processing clip: {} from {:.3}s to {:.3}s -> {} (max {:.2}MB, encoder {})",
            request.input.display(),
            request.start_secs,
            request.end_secs,
            request.output.display(),
            request.max_size as f64 / MB,
            self.encoder
        );
        let progress = ProgressAggregator::new(request.progress.clone());
        let mut temps = TempFiles::new();

        match self.run(request, &progress, &mut temps) {
            Ok(result) => result,
            Err(e) => {
                drop(temps);
                progress.reset();
                if e.is_aborted() {
                    log::info!(target: "clipdrop::compressor", "Compression cancelled");
                    CompressionResult::failure("Cancelled")
                } else {
                    log::error!(
                        target: "clipdrop::compressor",
                        "Fatal error compressing clip: {}",
                        e
                    );
                    CompressionResult::failure(format!("Error processing video: {}", e))
                }
            }
        }
    }

    /// Runs `compress` on the blocking pool.
    pub async fn compress_async(self: Arc<Self>, request: ClipRequest) -> CompressionResult {
        match tokio::task::spawn_blocking(move || self.compress(&request)).await {
            Ok(result) => result,
            Err(e) => {
                log::error!(
                    target: "clipdrop::compressor",
                    "Compression task failed: {}",
                    e
                );
                CompressionResult::failure(format!("Compression task failed: {}", e))
            }
        }
    }

    fn run(
        &self,
        request: &ClipRequest,
        progress: &ProgressAggregator,
        temps: &mut TempFiles,
    ) -> Result<CompressionResult, AppError> {
        self.settings.validate()?;
        let duration = request.validate()?;
        self.cancel.check()?;

        let source_size = fs::metadata(&request.input)?.len();
        let max_size = if request.max_size > source_size {
            log::info!(
                target: "clipdrop::compressor",
                "Max size {:.2}MB exceeds source size {:.2}MB; using source size",
                request.max_size as f64 / MB,
                source_size as f64 / MB
            );
            source_size
        } else {
            request.max_size
        };

        prepare_output_path(&request.output)?;
        let produced = self.produce(request, duration, max_size, progress, temps);
        if produced.is_err() {
            remove_if_exists(&request.output);
        }
        let (size, tier, recompressed) = produced?;

        let plan = PhasePlan::from_settings(&self.settings);
        let destination_results = self.upload(request, progress, plan);
        let webhook_success = destination_results.iter().any(|ok| *ok);
        progress.report(100.0);

        let within_limit = size <= max_size;
        let message = if within_limit {
            "Video processed successfully".to_string()
        } else {
            format!(
                "Video processed, but it is larger than the limit ({:.2}MB > {:.2}MB)",
                size as f64 / MB,
                max_size as f64 / MB
            )
        };
        log::info!(
            target: "clipdrop::compressor",
            "Video processing completed: {} ({:.2}MB)",
            request.output.display(),
            size as f64 / MB
        );
        Ok(CompressionResult {
            success: true,
            message,
            file_path: Some(request.output.clone()),
            file_size: size,
            within_limit,
            tier: Some(tier),
            recompressed,
            webhook_success,
            destination_results,
        })
    }

    /// Tier loop plus recovery. Returns (final size, tier label, recovery replaced output).
    fn produce(
        &self,
        request: &ClipRequest,
        duration: f64,
        max_size: u64,
        progress: &ProgressAggregator,
        temps: &mut TempFiles,
    ) -> Result<(u64, String, bool), AppError> {
        let plan = PhasePlan::from_settings(&self.settings);
        let source_resolution = self.probe.probe_resolution(&request.input);
        let tiers = plan_tiers(source_resolution, &self.settings.resolution_ladder);

        let executor = PassExecutor::new(&self.settings, self.transcoder.as_ref(), &self.cancel);
        let clip = ClipSource {
            input: &request.input,
            start_secs: request.start_secs,
            duration_secs: duration,
            output: &request.output,
            max_size,
            codec: &self.encoder,
        };
        let outcome = EncodeOrchestrator::new(&self.settings, &executor, progress, plan.compression)
            .run(&clip, &tiers, temps)?;
        if outcome.fits {
            return Ok((outcome.size, outcome.label, false));
        }

        log::warn!(
            target: "clipdrop::compressor",
            "Best attempt '{}' is oversized ({:.2}MB > {:.2}MB); attempting final re-compression",
            outcome.label,
            outcome.size as f64 / MB,
            max_size as f64 / MB
        );
        let recovery = SizeRecovery {
            settings: &self.settings,
            executor: &executor,
            probe: self.probe.as_ref(),
            progress,
            phase: plan.recovery,
        };
        let recovered = recovery.run(&request.output, duration, max_size, &self.encoder, temps)?;
        let recompressed = matches!(recovered, RecoveryOutcome::Recompressed { .. });
        Ok((recovered.size(), outcome.label, recompressed))
    }

    fn upload(&self, request: &ClipRequest, progress: &ProgressAggregator, plan: PhasePlan) -> Vec<bool> {
        if request.destinations.is_empty() {
            log::info!(
                target: "clipdrop::compressor",
                "No upload destinations; skipping upload"
            );
            return Vec::new();
        }
        log::info!(
            target: "clipdrop::compressor",
            "Uploading clip to {} destination(s)",
            request.destinations.len()
        );
        progress.report_in(plan.upload, 50);
        request
            .destinations
            .iter()
            .map(|destination| {
                if self.cancel.is_cancelled() {
                    return false;
                }
                match self
                    .uploader
                    .upload(&request.output, destination, request.title.as_deref())
                {
                    Ok(()) => true,
                    Err(e) => {
                        log::error!(target: "clipdrop::compressor", "Upload failed: {}", e);
                        false
                    }
                }
            })
            .collect()
    }
}
