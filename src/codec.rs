//! Encoder metadata and per-family argument strategies.
//!
//! Each encoder name the hardware-capability source may hand us maps to one
//! `EncoderFamily`. Families own their input args, filter chain and preset flags so
//! that adding one cannot reorder another's arguments.

use serde::Serialize;

use crate::config::PlatformProfile;
use crate::planner::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderFamily {
    Software,
    Nvenc,
    Amf,
    Qsv,
    Vaapi,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodecInfo {
    pub value: String,
    pub name: String,
    pub family: EncoderFamily,
    pub hardware: bool,
}

struct CodecRow {
    value: &'static str,
    name: &'static str,
    family: EncoderFamily,
}

macro_rules! codec_table {
    (
        $( [$value:expr, $name:expr, $family:expr] ),* $(,)?
    ) => {
        const CODEC_TABLE: &[CodecRow] = &[
            $( CodecRow {
                value: $value,
                name: $name,
                family: $family,
            } ),*
        ];

        /// Encoder names with known argument strategies.
        pub const SUPPORTED_ENCODER_NAMES: &[&str] = &[ $($value),* ];
    };
}

codec_table!(
    ["h264", "H.264 (software)", EncoderFamily::Software],
    ["libx264", "H.264 (x264)", EncoderFamily::Software],
    ["libx265", "H.265 (x265)", EncoderFamily::Software],
    ["h264_nvenc", "H.264 (NVIDIA NVENC)", EncoderFamily::Nvenc],
    ["hevc_nvenc", "H.265 (NVIDIA NVENC)", EncoderFamily::Nvenc],
    ["h264_amf", "H.264 (AMD AMF)", EncoderFamily::Amf],
    ["hevc_amf", "H.265 (AMD AMF)", EncoderFamily::Amf],
    ["h264_qsv", "H.264 (Intel Quick Sync)", EncoderFamily::Qsv],
    ["hevc_qsv", "H.265 (Intel Quick Sync)", EncoderFamily::Qsv],
    ["h264_vaapi", "H.264 (VA-API)", EncoderFamily::Vaapi],
    ["hevc_vaapi", "H.265 (VA-API)", EncoderFamily::Vaapi],
);

pub fn get_codec_info(codec: &str) -> Option<CodecInfo> {
    CODEC_TABLE.iter().find(|r| r.value == codec).map(|row| CodecInfo {
        value: row.value.to_string(),
        name: row.name.to_string(),
        family: row.family,
        hardware: row.family.is_hardware(),
    })
}

pub fn all_codec_infos() -> Vec<CodecInfo> {
    SUPPORTED_ENCODER_NAMES
        .iter()
        .filter_map(|name| get_codec_info(name))
        .collect()
}

impl EncoderFamily {
    /// Family for an encoder name. Names outside the table are matched by suffix and
    /// otherwise treated as software.
    pub fn of(codec: &str) -> Self {
        if let Some(row) = CODEC_TABLE.iter().find(|r| r.value == codec) {
            return row.family;
        }
        let lower = codec.to_lowercase();
        if lower.contains("vaapi") {
            EncoderFamily::Vaapi
        } else if lower.contains("nvenc") {
            EncoderFamily::Nvenc
        } else if lower.contains("amf") {
            EncoderFamily::Amf
        } else if lower.contains("qsv") {
            EncoderFamily::Qsv
        } else {
            EncoderFamily::Software
        }
    }

    pub fn is_hardware(self) -> bool {
        !matches!(self, EncoderFamily::Software)
    }

    /// VA-API frames must be uploaded to the GPU and cannot run 2-pass.
    pub fn supports_two_pass(self) -> bool {
        !matches!(self, EncoderFamily::Vaapi)
    }

    /// Decoder-side arguments placed before `-ss`/`-i`.
    pub fn input_args(self, profile: PlatformProfile, device: &str) -> Vec<String> {
        match self {
            EncoderFamily::Vaapi => {
                let mut args = vec![
                    "-hwaccel".to_string(),
                    "vaapi".to_string(),
                    "-hwaccel_device".to_string(),
                    device.to_string(),
                ];
                if profile != PlatformProfile::SteamDeck {
                    args.extend(["-hwaccel_output_format".to_string(), "vaapi".to_string()]);
                }
                args
            }
            _ => Vec::new(),
        }
    }

    /// Video filter chain entries, in order. Empty means no `-vf`.
    pub fn video_filters(self, resolution: Option<Resolution>, profile: PlatformProfile) -> Vec<String> {
        match self {
            EncoderFamily::Vaapi => {
                let mut filters = vec!["format=nv12".to_string(), "hwupload".to_string()];
                if let Some(res) = resolution {
                    filters.push(match profile {
                        PlatformProfile::SteamDeck => {
                            format!("scale_vaapi=w={}:h={}", res.width, res.height)
                        }
                        PlatformProfile::Generic => {
                            format!("scale_vaapi=w={}:h={}:format=nv12", res.width, res.height)
                        }
                    });
                }
                filters
            }
            _ => resolution
                .map(|res| vec![format!("scale={}", res)])
                .unwrap_or_default(),
        }
    }

    /// Preset / quality flags for re-encoding passes.
    pub fn preset_args(self) -> Vec<String> {
        match self {
            EncoderFamily::Software | EncoderFamily::Nvenc | EncoderFamily::Qsv => {
                vec!["-preset".to_string(), "medium".to_string()]
            }
            EncoderFamily::Amf => vec!["-quality".to_string(), "balanced".to_string()],
            EncoderFamily::Vaapi => Vec::new(),
        }
    }
}
