//! Scoped ownership of the pipeline's scratch files and the final move into place.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::planner::Resolution;

/// Pass log suffixes FFmpeg writes next to `-passlogfile` (x264 adds the mbtree file).
const PASSLOG_SUFFIXES: &[&str] = &["", "-0.log", "-0.log.mbtree"];

/// Deletes every registered path on drop unless the path was released first.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: PathBuf) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Stop tracking `path`; the caller owns it from here.
    pub fn release(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Remove `path` now and stop tracking it.
    pub fn discard(&mut self, path: &Path) {
        remove_if_exists(path);
        self.release(path);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_if_exists(path);
        }
    }
}

pub fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::trace!(
            target: "clipdrop::ffmpeg::temp",
            "Removed {}",
            path.display()
        ),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            target: "clipdrop::ffmpeg::temp",
            "Failed to remove {}: {}",
            path.display(),
            e
        ),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// `<output>.tier<index>_<W>x<H>.temp.mp4`, in the output's directory so the final move
/// is a rename. Built from the tier's position and size, never from its label.
pub fn tier_temp_path(output: &Path, index: usize, resolution: Resolution) -> PathBuf {
    with_suffix(
        output,
        &format!(".tier{}_{}x{}.temp.mp4", index, resolution.width, resolution.height),
    )
}

/// `<output>.temp_oversized_original.mp4`: where the oversized output waits during recovery.
pub fn oversized_backup_path(output: &Path) -> PathBuf {
    with_suffix(output, ".temp_oversized_original.mp4")
}

/// `<output>.ffpass`
pub fn passlog_path(output: &Path) -> PathBuf {
    with_suffix(output, ".ffpass")
}

pub fn passlog_files(passlog: &Path) -> Vec<PathBuf> {
    PASSLOG_SUFFIXES
        .iter()
        .map(|suffix| with_suffix(passlog, suffix))
        .collect()
}

pub fn cleanup_passlogs(passlog: &Path) {
    for path in passlog_files(passlog) {
        remove_if_exists(&path);
    }
}

/// Size in bytes, or None if the file is missing.
pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

fn is_cross_device_rename_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Rename `source` onto `dest`, replacing it. Falls back to copy + delete only across devices.
pub fn move_file(source: &Path, dest: &Path) -> Result<(), AppError> {
    log::debug!(
        target: "clipdrop::ffmpeg::temp",
        "Moving {} -> {}",
        source.display(),
        dest.display()
    );
    if cfg!(windows) && dest.exists() {
        fs::remove_file(dest)?;
    }
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_rename_error(&e) => {
            log::debug!(
                target: "clipdrop::ffmpeg::temp",
                "Cross-device move; copying {} instead",
                source.display()
            );
            fs::copy(source, dest)?;
            fs::remove_file(source)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Create the output's parent directory and clear any stale file at the output path.
pub fn prepare_output_path(output: &Path) -> Result<(), AppError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(output) {
        Ok(()) => {
            log::debug!(
                target: "clipdrop::ffmpeg::temp",
                "Removed existing output {}",
                output.display()
            );
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
