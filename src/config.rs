//! Pipeline settings. Passed explicitly into `ClipCompressor`; nothing here reads
//! process-global state.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::planner::{Resolution, ResolutionTier, default_ladder};

/// Platform quirks that change argument construction and pass selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlatformProfile {
    #[default]
    Generic,
    /// Steam Deck VA-API: simpler hwaccel args, single-pass only.
    SteamDeck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressSettings {
    /// Audio is always re-encoded at this rate; reserved out of the size budget.
    pub audio_bitrate_kbps: u32,
    /// Video bitrate floor. Quality is not sacrificed below this.
    pub min_video_bitrate_kbps: u32,
    pub tier_safety_factor: f64,
    pub recovery_safety_factor: f64,
    /// Share of the 0-100 progress scale used by the tier loop.
    pub compression_progress_share: u8,
    /// Share reserved for the recovery pass; upload gets the remainder.
    pub recovery_progress_share: u8,
    pub force_software_encoding: bool,
    pub software_codec: String,
    pub platform_profile: PlatformProfile,
    pub vaapi_device: Option<String>,
    pub probe_timeout_secs: u64,
    pub recovery_fallback_resolution: Resolution,
    pub resolution_ladder: Vec<ResolutionTier>,
}

impl Default for CompressSettings {
    fn default() -> Self {
        Self {
            audio_bitrate_kbps: 128,
            min_video_bitrate_kbps: 250,
            tier_safety_factor: 0.90,
            recovery_safety_factor: 0.85,
            compression_progress_share: 90,
            recovery_progress_share: 5,
            force_software_encoding: false,
            software_codec: "libx264".to_string(),
            platform_profile: PlatformProfile::Generic,
            vaapi_device: Some("/dev/dri/renderD128".to_string()),
            probe_timeout_secs: 15,
            recovery_fallback_resolution: Resolution::new(1280, 720),
            resolution_ladder: default_ladder(),
        }
    }
}

impl CompressSettings {
    pub fn from_json_str(json: &str) -> Result<Self, AppError> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| AppError::invalid_request(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let json = fs::read_to_string(path)?;
        log::debug!(
            target: "clipdrop::config",
            "Loaded settings from {}",
            path.display()
        );
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for (name, factor) in [
            ("tierSafetyFactor", self.tier_safety_factor),
            ("recoverySafetyFactor", self.recovery_safety_factor),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(AppError::invalid_request(format!(
                    "{} must be in (0, 1], got {}",
                    name, factor
                )));
            }
        }
        let reserved =
            u16::from(self.compression_progress_share) + u16::from(self.recovery_progress_share);
        if reserved > 100 {
            return Err(AppError::invalid_request(format!(
                "progress shares exceed 100 (compression {} + recovery {})",
                self.compression_progress_share, self.recovery_progress_share
            )));
        }
        if self.software_codec.trim().is_empty() {
            return Err(AppError::invalid_request("softwareCodec must not be empty"));
        }
        self.validate_ladder()
    }

    /// Labels show up in logs and results; they must be unique and plain.
    fn validate_ladder(&self) -> Result<(), AppError> {
        let mut seen = HashSet::new();
        for tier in &self.resolution_ladder {
            let label = tier.label.trim();
            if label.is_empty() {
                return Err(AppError::invalid_request("resolutionLadder labels must not be empty"));
            }
            if label.contains(['/', '\\']) || label.contains("..") {
                return Err(AppError::invalid_request(format!(
                    "resolutionLadder label '{}' must not contain path separators",
                    tier.label
                )));
            }
            if !seen.insert(label) {
                return Err(AppError::invalid_request(format!(
                    "duplicate resolutionLadder label '{}'",
                    tier.label
                )));
            }
            if tier.resolution().is_empty() {
                return Err(AppError::invalid_request(format!(
                    "resolutionLadder entry '{}' has a zero dimension",
                    tier.label
                )));
            }
        }
        Ok(())
    }

    pub fn with_force_software_encoding(mut self, force: bool) -> Self {
        self.force_software_encoding = force;
        self
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}
