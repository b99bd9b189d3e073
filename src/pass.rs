//! Pass Executor: runs one encode attempt (one or two FFmpeg passes) and falls
//! back from a hardware encoder to the software codec when the attempt fails.

use std::path::Path;

use crate::budget::VideoBitrate;
use crate::codec::EncoderFamily;
use crate::config::{CompressSettings, PlatformProfile};
use crate::error::AppError;
use crate::ffmpeg::temp::cleanup_passlogs;
use crate::ffmpeg::{CancelToken, PassKind, PassSpec, Transcoder, build_pass_args};
use crate::planner::Resolution;

/// What to encode and where; shared by every pass of one attempt.
#[derive(Debug, Clone)]
pub struct EncodeTarget<'a> {
    pub input: &'a Path,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub output: &'a Path,
    pub passlog: &'a Path,
    pub resolution: Option<Resolution>,
    pub bitrate: VideoBitrate,
}

/// How many passes an attempt uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    Single,
    TwoPass,
}

/// 2-pass for re-encodes on families that support it. The initial attempt on the
/// Steam Deck profile stays single-pass; its software fallback does not.
pub fn select_pass_mode(
    family: EncoderFamily,
    bitrate: VideoBitrate,
    profile: PlatformProfile,
    is_fallback: bool,
) -> PassMode {
    if bitrate.is_stream_copy() || !family.supports_two_pass() {
        return PassMode::Single;
    }
    if profile == PlatformProfile::SteamDeck && !is_fallback {
        return PassMode::Single;
    }
    PassMode::TwoPass
}

pub struct PassExecutor<'a> {
    settings: &'a CompressSettings,
    transcoder: &'a dyn Transcoder,
    cancel: &'a CancelToken,
}

impl<'a> PassExecutor<'a> {
    pub fn new(
        settings: &'a CompressSettings,
        transcoder: &'a dyn Transcoder,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            settings,
            transcoder,
            cancel,
        }
    }

    /// Codec actually used for the first attempt: hardware is swapped for the software
    /// codec when forced, and VA-API without a device is downgraded.
    pub fn effective_codec(&self, requested: &str) -> String {
        let family = EncoderFamily::of(requested);
        if self.settings.force_software_encoding && family.is_hardware() {
            log::info!(
                target: "clipdrop::pass",
                "Software encoding forced; {} replaced by {}",
                requested,
                self.settings.software_codec
            );
            return self.settings.software_codec.clone();
        }
        if family == EncoderFamily::Vaapi && self.settings.vaapi_device.is_none() {
            log::warn!(
                target: "clipdrop::pass",
                "VA-API codec {} requested but no VA-API device configured; using {}",
                requested,
                self.settings.software_codec
            );
            return self.settings.software_codec.clone();
        }
        requested.to_string()
    }

    /// One attempt with `requested` codec, then a software retry if that codec was
    /// hardware. Pass logs are removed on every exit. Returns the codec that succeeded.
    pub fn encode_with_fallback(
        &self,
        target: &EncodeTarget<'_>,
        requested: &str,
        force_single_pass: bool,
        on_progress: &dyn Fn(u8),
    ) -> Result<String, AppError> {
        let result =
            self.encode_with_fallback_inner(target, requested, force_single_pass, on_progress);
        cleanup_passlogs(target.passlog);
        result
    }

    fn encode_with_fallback_inner(
        &self,
        target: &EncodeTarget<'_>,
        requested: &str,
        force_single_pass: bool,
        on_progress: &dyn Fn(u8),
    ) -> Result<String, AppError> {
        let codec = self.effective_codec(requested);
        let family = EncoderFamily::of(&codec);
        let mode = self.mode_for(family, target.bitrate, false, force_single_pass);

        let initial = match self.encode(target, &codec, mode, on_progress) {
            Ok(()) => return Ok(codec),
            Err(e) => e,
        };
        if initial.is_aborted() {
            return Err(initial);
        }
        log::error!(
            target: "clipdrop::pass",
            "Encoding with {} failed: {}",
            codec,
            initial
        );
        if !family.is_hardware() {
            return Err(initial);
        }

        let fallback = self.settings.software_codec.clone();
        log::warn!(
            target: "clipdrop::pass",
            "Falling back from {} to software encoder {}{}",
            codec,
            fallback,
            if initial.is_out_of_memory() { " after memory exhaustion" } else { "" }
        );
        cleanup_passlogs(target.passlog);
        let mode = self.mode_for(
            EncoderFamily::of(&fallback),
            target.bitrate,
            true,
            force_single_pass,
        );
        match self.encode(target, &fallback, mode, on_progress) {
            Ok(()) => Ok(fallback),
            Err(e) => {
                log::error!(
                    target: "clipdrop::pass",
                    "Software fallback {} failed: {}",
                    fallback,
                    e
                );
                Err(e)
            }
        }
    }

    fn mode_for(
        &self,
        family: EncoderFamily,
        bitrate: VideoBitrate,
        is_fallback: bool,
        force_single_pass: bool,
    ) -> PassMode {
        if force_single_pass {
            PassMode::Single
        } else {
            select_pass_mode(family, bitrate, self.settings.platform_profile, is_fallback)
        }
    }

    /// Run the passes of one attempt. Progress is 0-100 across the attempt: 2-pass
    /// splits it evenly between the passes.
    pub fn encode(
        &self,
        target: &EncodeTarget<'_>,
        codec: &str,
        mode: PassMode,
        on_progress: &dyn Fn(u8),
    ) -> Result<(), AppError> {
        log::info!(
            target: "clipdrop::pass",
            "Encoding {:?} with {} at {} ({})",
            mode,
            codec,
            target.bitrate,
            target
                .resolution
                .map(|r| r.to_string())
                .unwrap_or_else(|| "source resolution".to_string())
        );
        match mode {
            PassMode::Single => {
                self.run_pass(target, codec, PassKind::Single, on_progress)?;
            }
            PassMode::TwoPass => {
                self.run_pass(target, codec, PassKind::First, &|p: u8| on_progress(p / 2))?;
                self.run_pass(target, codec, PassKind::Second, &|p: u8| {
                    on_progress(50 + p / 2)
                })?;
            }
        }
        on_progress(100);
        Ok(())
    }

    /// Argument vectors the first attempt would run, without running them.
    pub fn planned_passes(
        &self,
        target: &EncodeTarget<'_>,
        requested: &str,
        force_single_pass: bool,
    ) -> Vec<Vec<String>> {
        let codec = self.effective_codec(requested);
        let mode = self.mode_for(EncoderFamily::of(&codec), target.bitrate, false, force_single_pass);
        let kinds: &[PassKind] = match mode {
            PassMode::Single => &[PassKind::Single],
            PassMode::TwoPass => &[PassKind::First, PassKind::Second],
        };
        kinds
            .iter()
            .map(|kind| build_pass_args(&self.pass_spec(target, &codec, *kind)))
            .collect()
    }

    fn run_pass(
        &self,
        target: &EncodeTarget<'_>,
        codec: &str,
        kind: PassKind,
        on_progress: &dyn Fn(u8),
    ) -> Result<(), AppError> {
        self.cancel.check()?;
        let spec = self.pass_spec(target, codec, kind);
        let args = build_pass_args(&spec);
        self.transcoder
            .run(&args, spec.effective_duration(), on_progress, self.cancel)
    }

    fn pass_spec(&self, target: &EncodeTarget<'_>, codec: &str, kind: PassKind) -> PassSpec {
        PassSpec {
            input: target.input.to_path_buf(),
            start_secs: target.start_secs,
            duration_secs: target.duration_secs,
            output: target.output.to_path_buf(),
            codec: codec.to_string(),
            bitrate: target.bitrate,
            resolution: target.resolution,
            kind,
            passlog: target.passlog.to_path_buf(),
            audio_kbps: self.settings.audio_bitrate_kbps,
            profile: self.settings.platform_profile,
            vaapi_device: self.settings.vaapi_device.clone(),
        }
    }
}
