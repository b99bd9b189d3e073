//! Encode Orchestrator: walks the resolution tiers highest quality first and
//! accepts the first one whose output fits the byte budget.

use std::path::{Path, PathBuf};

use crate::budget::BitrateBudget;
use crate::config::CompressSettings;
use crate::error::AppError;
use crate::ffmpeg::temp::{TempFiles, file_size, move_file, passlog_path, tier_temp_path};
use crate::pass::{EncodeTarget, PassExecutor};
use crate::planner::ResolutionTier;
use crate::progress::{Phase, ProgressAggregator};

/// The clip every tier re-encodes.
#[derive(Debug, Clone, Copy)]
pub struct ClipSource<'a> {
    pub input: &'a Path,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub output: &'a Path,
    pub max_size: u64,
    pub codec: &'a str,
}

/// Output of one tier that produced a file.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeAttempt {
    pub path: PathBuf,
    pub size: u64,
    pub label: String,
}

/// What ended up at the output path after the tier loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TierLoopOutcome {
    pub label: String,
    pub size: u64,
    pub fits: bool,
}

pub struct EncodeOrchestrator<'a> {
    settings: &'a CompressSettings,
    executor: &'a PassExecutor<'a>,
    progress: &'a ProgressAggregator,
    phase: Phase,
}

impl<'a> EncodeOrchestrator<'a> {
    pub fn new(
        settings: &'a CompressSettings,
        executor: &'a PassExecutor<'a>,
        progress: &'a ProgressAggregator,
        phase: Phase,
    ) -> Self {
        Self {
            settings,
            executor,
            progress,
            phase,
        }
    }

    /// Try each tier in order. The first output within `max_size` is moved to the
    /// output path and the loop stops. If none fits, the smallest output is moved
    /// there instead. Fails with `AllTiersFailed` if no tier produced anything.
    pub fn run(
        &self,
        clip: &ClipSource<'_>,
        tiers: &[ResolutionTier],
        temps: &mut TempFiles,
    ) -> Result<TierLoopOutcome, AppError> {
        let budget = BitrateBudget::from_settings(self.settings);
        let mut best: Option<EncodeAttempt> = None;

        for (index, tier) in tiers.iter().enumerate() {
            let tier_phase = self.phase.slice(index, tiers.len());
            let Some(attempt) = self.run_tier(clip, index, tier, &budget, tier_phase, temps)? else {
                self.progress.complete(tier_phase);
                continue;
            };

            if best.as_ref().is_none_or(|b| attempt.size < b.size) {
                if let Some(previous) = best.take() {
                    temps.discard(&previous.path);
                }
                best = Some(attempt.clone());
            } else {
                temps.discard(&attempt.path);
            }

            if attempt.size <= clip.max_size {
                log::info!(
                    target: "clipdrop::orchestrator",
                    "Tier '{}' meets target size ({} <= {} bytes)",
                    attempt.label,
                    attempt.size,
                    clip.max_size
                );
                move_file(&attempt.path, clip.output)?;
                temps.release(&attempt.path);
                self.progress.complete(self.phase);
                return Ok(TierLoopOutcome {
                    label: attempt.label,
                    size: attempt.size,
                    fits: true,
                });
            }
            self.progress.complete(tier_phase);
        }

        let Some(best) = best else {
            log::error!(
                target: "clipdrop::orchestrator",
                "All {} tiers failed or produced no output",
                tiers.len()
            );
            return Err(AppError::AllTiersFailed);
        };
        log::warn!(
            target: "clipdrop::orchestrator",
            "No tier met {} bytes; best attempt is '{}' at {} bytes",
            clip.max_size,
            best.label,
            best.size
        );
        move_file(&best.path, clip.output)?;
        temps.release(&best.path);
        self.progress.complete(self.phase);
        Ok(TierLoopOutcome {
            label: best.label,
            size: best.size,
            fits: false,
        })
    }

    /// Encode one tier into its temp file. `Ok(None)` when the tier failed or wrote nothing;
    /// only cancellation propagates as an error.
    fn run_tier(
        &self,
        clip: &ClipSource<'_>,
        index: usize,
        tier: &ResolutionTier,
        budget: &BitrateBudget,
        tier_phase: Phase,
        temps: &mut TempFiles,
    ) -> Result<Option<EncodeAttempt>, AppError> {
        let temp = tier_temp_path(clip.output, index, tier.resolution());
        let passlog = passlog_path(&temp);
        temps.add(temp.clone());

        let bitrate = budget.video_bitrate(
            clip.duration_secs,
            clip.max_size,
            self.settings.tier_safety_factor,
        );
        log::info!(
            target: "clipdrop::orchestrator",
            "Attempting tier '{}': resolution={}, bitrate={}",
            tier.label,
            tier.resolution(),
            bitrate
        );

        let target = EncodeTarget {
            input: clip.input,
            start_secs: clip.start_secs,
            duration_secs: clip.duration_secs,
            output: &temp,
            passlog: &passlog,
            resolution: Some(tier.resolution()),
            bitrate,
        };
        let progress = self.progress;
        let encoded = self.executor.encode_with_fallback(&target, clip.codec, false, &|p: u8| {
            progress.report_in(tier_phase, p)
        });
        match encoded {
            Ok(_) => {}
            Err(e) if e.is_aborted() => return Err(e),
            Err(e) => {
                log::error!(
                    target: "clipdrop::orchestrator",
                    "Tier '{}' failed: {}",
                    tier.label,
                    e
                );
                temps.discard(&temp);
                return Ok(None);
            }
        }

        match file_size(&temp) {
            Some(size) if size > 0 => {
                log::info!(
                    target: "clipdrop::orchestrator",
                    "Tier '{}' compressed to {:.2}MB",
                    tier.label,
                    size as f64 / (1024.0 * 1024.0)
                );
                Ok(Some(EncodeAttempt {
                    path: temp,
                    size,
                    label: tier.label.clone(),
                }))
            }
            _ => {
                log::warn!(
                    target: "clipdrop::orchestrator",
                    "Tier '{}' did not produce an output file",
                    tier.label
                );
                temps.discard(&temp);
                Ok(None)
            }
        }
    }
}
