use std::path::PathBuf;

use super::path_to_string;
use crate::budget::VideoBitrate;
use crate::codec::EncoderFamily;
use crate::config::PlatformProfile;
use crate::planner::Resolution;

#[cfg(windows)]
pub const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
pub const NULL_SINK: &str = "/dev/null";

/// Shortest clip length passed to `-t`; zero-length requests would make FFmpeg encode nothing.
const MIN_PASS_DURATION_SECS: f64 = 0.001;

/// Which leg of an encode this invocation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Complete encode in one invocation (also used for stream copy).
    Single,
    /// Analysis pass of 2-pass: writes the pass log, discards output.
    First,
    /// Final pass of 2-pass: reads the pass log, writes the real output.
    Second,
}

impl PassKind {
    pub fn number(self) -> u8 {
        match self {
            PassKind::Single | PassKind::First => 1,
            PassKind::Second => 2,
        }
    }
}

/// Everything needed to build one FFmpeg invocation.
#[derive(Debug, Clone)]
pub struct PassSpec {
    pub input: PathBuf,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub output: PathBuf,
    pub codec: String,
    pub bitrate: VideoBitrate,
    pub resolution: Option<Resolution>,
    pub kind: PassKind,
    pub passlog: PathBuf,
    pub audio_kbps: u32,
    pub profile: PlatformProfile,
    pub vaapi_device: Option<String>,
}

impl PassSpec {
    pub fn family(&self) -> EncoderFamily {
        EncoderFamily::of(&self.codec)
    }

    /// First pass of a real 2-pass encode: output goes to the null sink.
    pub fn writes_null_sink(&self) -> bool {
        self.kind == PassKind::First && !self.bitrate.is_stream_copy()
    }

    pub fn effective_duration(&self) -> f64 {
        self.duration_secs.max(MIN_PASS_DURATION_SECS)
    }
}

/// Build the argument vector (without the binary) for one pass.
pub fn build_pass_args(spec: &PassSpec) -> Vec<String> {
    let family = spec.family();
    let duration = spec.effective_duration();

    log::debug!(
        target: "clipdrop::ffmpeg::builder",
        "Building pass {} ({:?}): codec={}, family={:?}, bitrate={}, resolution={:?}, input={} -> output={}",
        spec.kind.number(),
        spec.kind,
        spec.codec,
        family,
        spec.bitrate,
        spec.resolution,
        spec.input.display(),
        spec.output.display()
    );

    let mut args = vec!["-y".to_string(), "-nostdin".to_string()];

    if spec.bitrate.is_stream_copy() {
        args.extend(seek_args(spec, duration));
        args.extend([
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            path_to_string(&spec.output),
        ]);
        return args;
    }

    if family == EncoderFamily::Vaapi
        && let Some(device) = spec.vaapi_device.as_deref()
    {
        args.extend(family.input_args(spec.profile, device));
    }
    args.extend(seek_args(spec, duration));
    args.extend([
        "-c:v".to_string(),
        spec.codec.clone(),
        "-b:v".to_string(),
        spec.bitrate.to_string(),
    ]);

    if spec.kind != PassKind::Single {
        args.extend([
            "-pass".to_string(),
            spec.kind.number().to_string(),
            "-passlogfile".to_string(),
            path_to_string(&spec.passlog),
        ]);
    }

    let filters = family.video_filters(spec.resolution, spec.profile);
    if !filters.is_empty() {
        args.extend(["-vf".to_string(), filters.join(",")]);
    }

    args.extend(family.preset_args());

    if spec.writes_null_sink() {
        args.extend([
            "-an".to_string(),
            "-f".to_string(),
            "null".to_string(),
            NULL_SINK.to_string(),
        ]);
    } else {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", spec.audio_kbps),
            "-movflags".to_string(),
            "+faststart".to_string(),
            path_to_string(&spec.output),
        ]);
    }
    args
}

fn seek_args(spec: &PassSpec, duration: f64) -> [String; 6] {
    [
        "-ss".to_string(),
        format!("{:.3}", spec.start_secs),
        "-i".to_string(),
        path_to_string(&spec.input),
        "-t".to_string(),
        format!("{:.3}", duration),
    ]
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-') && i + 1 < args.len() && !args[i + 1].starts_with('-') {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}
