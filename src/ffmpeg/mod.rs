mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
pub mod temp;

use std::path::Path;

pub use builder::{
    NULL_SINK, PassKind, PassSpec, build_pass_args, format_args_for_display_multiline,
};
pub use error::{FfmpegErrorPayload, is_memory_exhaustion, parse_ffmpeg_error};
pub use ffprobe::{FfprobeResolutionProbe, ResolutionProbe};
pub use progress::{parse_time_marker, percent};
pub use runner::{CancelToken, FfmpegTranscoder, Transcoder, run_ffmpeg_blocking};

pub(crate) fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
