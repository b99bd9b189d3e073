//! FFmpeg process spawning, stderr progress parsing and cancellation.
//!
//! The child's stderr is read on the calling thread, so the progress callback
//! fires on that thread and never concurrently. The live child handle is parked
//! in a `CancelToken`; cancelling from another thread kills and reaps it, which
//! closes stderr and unblocks the reader.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::discovery::get_ffmpeg_path;
use super::error::is_memory_exhaustion;
use super::progress::{parse_time_marker, percent};
use crate::error::AppError;

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Cooperative cancellation shared between the pipeline and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    active: Arc<Mutex<Option<Child>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark cancelled and kill the running child, if any. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let child = self.active.lock().take();
        if let Some(mut child) = child {
            log::info!(
                target: "clipdrop::ffmpeg::runner",
                "Terminating FFmpeg process {}",
                child.id()
            );
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Err(Aborted) when cancellation was requested.
    pub fn check(&self) -> Result<(), AppError> {
        if self.is_cancelled() {
            Err(AppError::aborted())
        } else {
            Ok(())
        }
    }

    fn attach(&self, mut child: Child) -> Result<(), AppError> {
        let mut guard = self.active.lock();
        if self.is_cancelled() {
            drop(guard);
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::aborted());
        }
        *guard = Some(child);
        Ok(())
    }

    fn detach(&self) -> Option<Child> {
        self.active.lock().take()
    }
}

/// Runs one transcoder invocation. `on_progress` receives this invocation's own 0-100 percent.
pub trait Transcoder: Send + Sync {
    fn run(
        &self,
        args: &[String],
        duration_secs: f64,
        on_progress: &dyn Fn(u8),
        cancel: &CancelToken,
    ) -> Result<(), AppError>;
}

/// The real FFmpeg binary, located through discovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegTranscoder;

impl Transcoder for FfmpegTranscoder {
    fn run(
        &self,
        args: &[String],
        duration_secs: f64,
        on_progress: &dyn Fn(u8),
        cancel: &CancelToken,
    ) -> Result<(), AppError> {
        run_ffmpeg_blocking(args, duration_secs, on_progress, cancel)
    }
}

/// Run FFmpeg and block until it exits.
pub fn run_ffmpeg_blocking(
    args: &[String],
    duration_secs: f64,
    on_progress: &dyn Fn(u8),
    cancel: &CancelToken,
) -> Result<(), AppError> {
    let ffmpeg_path = get_ffmpeg_path()?;
    run_process(ffmpeg_path, args, duration_secs, on_progress, cancel)
}

fn run_process(
    program: &Path,
    args: &[String],
    duration_secs: f64,
    on_progress: &dyn Fn(u8),
    cancel: &CancelToken,
) -> Result<(), AppError> {
    cancel.check()?;
    log::debug!(
        target: "clipdrop::ffmpeg::runner",
        "Spawning FFmpeg: {} {}",
        program.display(),
        args.join(" ")
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::from(format!("Failed to spawn FFmpeg: {}", e)))?;

    let stderr = match child.stderr.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::from("Failed to capture stderr"));
        }
    };
    cancel.attach(child)?;

    let mut tail: Vec<u8> = Vec::new();
    let mut memory_exhausted = false;
    let mut last_percent: Option<u8> = None;
    for_each_line(stderr, |line| {
        tail.extend_from_slice(line.as_bytes());
        tail.push(b'\n');
        if tail.len() > MAX_STDERR_BYTES {
            let excess = tail.len() - MAX_STDERR_BYTES;
            tail.drain(..excess);
        }
        if !memory_exhausted && is_memory_exhaustion(line) {
            memory_exhausted = true;
            log::warn!(
                target: "clipdrop::ffmpeg::runner",
                "Memory exhaustion reported: {}",
                line.trim()
            );
        }
        if let Some(elapsed) = parse_time_marker(line) {
            let p = percent(elapsed, duration_secs);
            if last_percent != Some(p) {
                last_percent = Some(p);
                on_progress(p);
            }
        }
    });

    let status = match cancel.detach() {
        Some(mut c) => c.wait()?,
        None => {
            log::warn!(
                target: "clipdrop::ffmpeg::runner",
                "FFmpeg process was aborted (terminated externally)"
            );
            return Err(AppError::aborted());
        }
    };

    let stderr_str = String::from_utf8_lossy(&tail).to_string();
    if status.success() {
        log::debug!(
            target: "clipdrop::ffmpeg::runner",
            "FFmpeg completed successfully"
        );
        return Ok(());
    }

    let code = status.code().unwrap_or(-1);
    let err_preview = stderr_str
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .join("; ");
    log::error!(
        target: "clipdrop::ffmpeg::runner",
        "FFmpeg failed (code={}): {}",
        code,
        err_preview
    );
    if memory_exhausted {
        Err(AppError::OutOfMemory {
            code,
            stderr: stderr_str,
        })
    } else {
        Err(AppError::FfmpegFailed {
            code,
            stderr: stderr_str,
        })
    }
}

/// Split a byte stream on `\n` or `\r`; FFmpeg rewrites its status line with bare carriage returns.
fn for_each_line<R: Read>(reader: R, mut on_line: impl FnMut(&str)) {
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(256);
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if buf.is_empty() {
            break;
        }
        let consumed = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    on_line(&String::from_utf8_lossy(&line));
                    line.clear();
                }
            } else {
                line.push(byte);
            }
        }
        reader.consume(consumed);
    }
    if !line.is_empty() {
        on_line(&String::from_utf8_lossy(&line));
    }
}
