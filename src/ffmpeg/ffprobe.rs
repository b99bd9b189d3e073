//! FFprobe-based metadata and resolution detection, bounded by a timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::discovery::get_ffprobe_path;
use crate::error::AppError;
use crate::planner::Resolution;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    tags: Option<FfprobeTags>,
    #[serde(default)]
    side_data_list: Option<Vec<FfprobeSideData>>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

impl FfprobeStream {
    fn is_video(&self) -> bool {
        // Resolution-only probes select v:0 and omit codec_type.
        self.codec_type.as_deref().is_none_or(|t| t == "video")
    }

    /// Rotation in degrees from the legacy `rotate` tag or the display matrix side data.
    fn rotation(&self) -> i32 {
        let from_tag = self
            .tags
            .as_ref()
            .and_then(|t| t.rotate.as_deref())
            .and_then(|r| r.trim().parse::<f64>().ok());
        let from_side_data = self
            .side_data_list
            .iter()
            .flatten()
            .find_map(|sd| sd.rotation);
        from_tag.or(from_side_data).map(|r| r.round() as i32).unwrap_or(0)
    }

    /// Width/height as displayed: swapped for quarter-turn rotations.
    fn display_resolution(&self) -> Option<Resolution> {
        let (w, h) = (self.width?, self.height?);
        let res = if is_quarter_turn(self.rotation()) {
            Resolution::new(h, w)
        } else {
            Resolution::new(w, h)
        };
        (!res.is_empty()).then_some(res)
    }
}

fn is_quarter_turn(rotation: i32) -> bool {
    matches!(rotation.rem_euclid(360), 90 | 270)
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den != 0.0).then(|| num / den)
}

fn parse_output(json: &str) -> Result<FfprobeOutput, AppError> {
    serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub duration: f64,
    /// Display width (after rotation).
    pub width: u32,
    pub height: u32,
    pub rotation: i32,
    pub size: u64,
    pub fps: f64,
    pub codec_name: Option<String>,
    pub format_name: Option<String>,
}

pub fn parse_ffprobe_json(json: &str) -> Result<VideoMetadata, AppError> {
    let output = parse_output(json)?;
    let format = output.format.as_ref();
    let video = output
        .streams
        .as_ref()
        .and_then(|streams| streams.iter().find(|s| s.is_video()));
    let resolution = video.and_then(FfprobeStream::display_resolution);

    Ok(VideoMetadata {
        duration: format
            .and_then(|f| f.duration.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0),
        width: resolution.map(|r| r.width).unwrap_or(0),
        height: resolution.map(|r| r.height).unwrap_or(0),
        rotation: video.map(FfprobeStream::rotation).unwrap_or(0),
        size: format
            .and_then(|f| f.size.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        fps: video
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate)
            .unwrap_or(0.0),
        codec_name: video.and_then(|s| s.codec_name.clone()),
        format_name: format.and_then(|f| f.format_name.clone()),
    })
}

/// Display resolution of the first video stream, or None when absent or unparsable.
pub fn parse_resolution_json(json: &str) -> Option<Resolution> {
    let output = parse_output(json).ok()?;
    output
        .streams?
        .iter()
        .find(|s| s.is_video())
        .and_then(FfprobeStream::display_resolution)
}

/// Exit status of `child`. If `timeout` passes or polling fails, the child is
/// killed and reaped before the error is returned.
fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<ExitStatus, AppError> {
    let deadline = Instant::now() + timeout;
    let err = loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => break AppError::from(format!("Failed to wait for ffprobe: {}", e)),
        }
        if Instant::now() >= deadline {
            break AppError::from(format!("ffprobe timed out after {:?}", timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };
    let _ = child.kill();
    let _ = child.wait();
    log::warn!(target: "clipdrop::ffmpeg::ffprobe", "{}", err);
    Err(err)
}

/// Run ffprobe and return stdout, killing it if it outlives `timeout`.
fn run_ffprobe(args: &[&str], timeout: Duration) -> Result<String, AppError> {
    let ffprobe = get_ffprobe_path()?;
    log::debug!(
        target: "clipdrop::ffmpeg::ffprobe",
        "Running {} {}",
        ffprobe.display(),
        args.join(" ")
    );

    let mut child = Command::new(&ffprobe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AppError::from(format!("Failed to run ffprobe: {}", e)))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::from("Failed to capture ffprobe stdout"))?;
    let reader = thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout.read_to_string(&mut buf);
        buf
    });

    let status = match wait_or_kill(&mut child, timeout) {
        Ok(status) => status,
        Err(e) => {
            let _ = reader.join();
            return Err(e);
        }
    };

    let json = reader
        .join()
        .map_err(|_| AppError::from("ffprobe reader thread panicked"))?;
    if !status.success() {
        return Err(AppError::from(format!(
            "ffprobe failed (code {})",
            status.code().unwrap_or(-1)
        )));
    }
    Ok(json)
}

pub fn get_video_metadata(path: &Path, timeout: Duration) -> Result<VideoMetadata, AppError> {
    let path_str = path.to_string_lossy();
    let json = run_ffprobe(
        &[
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            &path_str,
        ],
        timeout,
    )?;
    parse_ffprobe_json(&json)
}

/// Source of a file's display resolution. Failures are reported as None.
pub trait ResolutionProbe: Send + Sync {
    fn probe_resolution(&self, path: &Path) -> Option<Resolution>;
}

#[derive(Debug, Clone, Copy)]
pub struct FfprobeResolutionProbe {
    timeout: Duration,
}

impl FfprobeResolutionProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ResolutionProbe for FfprobeResolutionProbe {
    fn probe_resolution(&self, path: &Path) -> Option<Resolution> {
        let path_str = path.to_string_lossy();
        let result = run_ffprobe(
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:stream_tags=rotate:stream_side_data=rotation",
                "-of",
                "json",
                &path_str,
            ],
            self.timeout,
        );
        match result {
            Ok(json) => {
                let res = parse_resolution_json(&json);
                log::debug!(
                    target: "clipdrop::ffmpeg::ffprobe",
                    "Resolution of {}: {:?}",
                    path.display(),
                    res
                );
                res
            }
            Err(e) => {
                log::warn!(
                    target: "clipdrop::ffmpeg::ffprobe",
                    "Could not detect resolution of {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }
}
