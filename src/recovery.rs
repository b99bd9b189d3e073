//! Size-Recovery Stage: one stricter re-encode of an oversized output, reverting to
//! the oversized file unless the new one is non-empty and within budget.

use std::path::Path;

use crate::budget::BitrateBudget;
use crate::config::CompressSettings;
use crate::error::AppError;
use crate::ffmpeg::ResolutionProbe;
use crate::ffmpeg::temp::{
    TempFiles, file_size, move_file, oversized_backup_path, passlog_path, remove_if_exists,
};
use crate::pass::{EncodeTarget, PassExecutor};
use crate::progress::{Phase, ProgressAggregator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The re-encode fit and replaced the output.
    Recompressed { size: u64 },
    /// The oversized file was restored.
    Reverted { size: u64 },
}

impl RecoveryOutcome {
    pub fn size(&self) -> u64 {
        match *self {
            RecoveryOutcome::Recompressed { size } | RecoveryOutcome::Reverted { size } => size,
        }
    }
}

pub struct SizeRecovery<'a> {
    pub settings: &'a CompressSettings,
    pub executor: &'a PassExecutor<'a>,
    pub probe: &'a dyn ResolutionProbe,
    pub progress: &'a ProgressAggregator,
    pub phase: Phase,
}

impl SizeRecovery<'_> {
    /// Re-encode `output` (already `duration_secs` long) toward `max_size`.
    /// Only I/O failures while moving files and cancellation are errors.
    pub fn run(
        &self,
        output: &Path,
        duration_secs: f64,
        max_size: u64,
        codec: &str,
        temps: &mut TempFiles,
    ) -> Result<RecoveryOutcome, AppError> {
        let backup = oversized_backup_path(output);
        move_file(output, &backup)?;
        temps.add(backup.clone());

        let resolution = self.probe.probe_resolution(&backup).unwrap_or_else(|| {
            log::warn!(
                target: "clipdrop::recovery",
                "Could not get resolution of oversized clip; using {}",
                self.settings.recovery_fallback_resolution
            );
            self.settings.recovery_fallback_resolution
        });
        let bitrate = BitrateBudget::from_settings(self.settings).video_bitrate(
            duration_secs,
            max_size,
            self.settings.recovery_safety_factor,
        );
        log::info!(
            target: "clipdrop::recovery",
            "Final re-compression: {} -> {}, resolution={}, bitrate={}",
            backup.display(),
            output.display(),
            resolution,
            bitrate
        );

        let passlog = passlog_path(output);
        let target = EncodeTarget {
            input: &backup,
            start_secs: 0.0,
            duration_secs,
            output,
            passlog: &passlog,
            resolution: Some(resolution),
            bitrate,
        };
        let (progress, phase) = (self.progress, self.phase);
        let encoded = self
            .executor
            .encode_with_fallback(&target, codec, true, &|p: u8| progress.report_in(phase, p));

        match encoded {
            Err(e) if e.is_aborted() => {
                self.revert(output, &backup, temps)?;
                return Err(e);
            }
            Err(e) => {
                log::error!(
                    target: "clipdrop::recovery",
                    "Final re-compression failed: {}; reverting",
                    e
                );
            }
            Ok(_) => match file_size(output) {
                Some(size) if size > 0 && size <= max_size => {
                    log::info!(
                        target: "clipdrop::recovery",
                        "Final re-compression fits: {} bytes",
                        size
                    );
                    temps.discard(&backup);
                    self.progress.complete(self.phase);
                    return Ok(RecoveryOutcome::Recompressed { size });
                }
                other => {
                    log::warn!(
                        target: "clipdrop::recovery",
                        "Final re-compression missed the target (size {:?}, max {}); reverting",
                        other,
                        max_size
                    );
                }
            },
        }

        let size = self.revert(output, &backup, temps)?;
        self.progress.complete(self.phase);
        Ok(RecoveryOutcome::Reverted { size })
    }

    fn revert(&self, output: &Path, backup: &Path, temps: &mut TempFiles) -> Result<u64, AppError> {
        remove_if_exists(output);
        move_file(backup, output)?;
        temps.release(backup);
        Ok(file_size(output).unwrap_or(0))
    }
}
