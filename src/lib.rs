pub mod budget;
mod codec;
pub mod compressor;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod orchestrator;
pub mod pass;
pub mod planner;
pub mod progress;
pub mod recovery;
pub mod sidecar_api;
pub mod upload;

pub use codec::{CodecInfo, EncoderFamily, SUPPORTED_ENCODER_NAMES, all_codec_infos, get_codec_info};
pub use compressor::{ClipCompressor, ClipRequest, CompressionResult};
pub use config::{CompressSettings, PlatformProfile};
pub use error::AppError;
pub use ffmpeg::CancelToken;
pub use planner::{Resolution, ResolutionTier};
pub use progress::ProgressCallback;
