//! Bitrate budget: turns a byte ceiling and clip duration into a target video bitrate.

use std::fmt;

use crate::config::CompressSettings;

/// Video bitrate passed to the encoder. `StreamCopy` renders as the `"0"` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoBitrate {
    StreamCopy,
    Kbps(u64),
}

impl VideoBitrate {
    /// Parse `"<n>k"` or the stream-copy sentinel `"0"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s == "0" {
            return Some(Self::StreamCopy);
        }
        let kbps: u64 = s.strip_suffix('k')?.parse().ok()?;
        (kbps > 0).then_some(Self::Kbps(kbps))
    }

    pub fn is_stream_copy(&self) -> bool {
        matches!(self, Self::StreamCopy)
    }
}

impl fmt::Display for VideoBitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamCopy => f.write_str("0"),
            Self::Kbps(k) => write!(f, "{}k", k),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateBudget {
    pub audio_kbps: u32,
    pub floor_kbps: u32,
}

impl BitrateBudget {
    pub fn new(audio_kbps: u32, floor_kbps: u32) -> Self {
        Self {
            audio_kbps,
            floor_kbps,
        }
    }

    pub fn from_settings(settings: &CompressSettings) -> Self {
        Self::new(settings.audio_bitrate_kbps, settings.min_video_bitrate_kbps)
    }

    /// Target video bitrate so that `duration_secs` of video plus the audio allowance fits
    /// in `max_size * safety_factor` bytes. Never below the floor; no ceiling.
    pub fn video_bitrate(&self, duration_secs: f64, max_size: u64, safety_factor: f64) -> VideoBitrate {
        let target_total_bits = max_size as f64 * 8.0 * safety_factor;
        let audio_bits = f64::from(self.audio_kbps) * 1000.0 * duration_secs;
        let target_video_bits = target_total_bits - audio_bits;

        if target_video_bits <= 0.0 || duration_secs <= 0.0 {
            log::warn!(
                target: "clipdrop::budget",
                "Budget of {:.2}MB (x{}) leaves no room for video beside {}kbps audio over {:.3}s; using floor {}kbps",
                max_size as f64 / (1024.0 * 1024.0),
                safety_factor,
                self.audio_kbps,
                duration_secs,
                self.floor_kbps
            );
            return VideoBitrate::Kbps(u64::from(self.floor_kbps));
        }

        let kbps = (target_video_bits / duration_secs) / 1000.0;
        let clamped = kbps.max(f64::from(self.floor_kbps));
        VideoBitrate::Kbps(clamped as u64)
    }
}
