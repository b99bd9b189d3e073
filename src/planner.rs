//! Resolution tier planning. Builds the ordered list of output sizes to try,
//! highest quality first, never upscaling the source.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Used when the source size is unknown and the ladder is empty.
const LAST_RESORT_TIER: (u32, u32, &str) = (640, 360, "360p_fallback");

const DEFAULT_LADDER: &[(u32, u32, &str)] = &[
    (1920, 1080, "1080p"),
    (1280, 720, "720p"),
    (854, 480, "480p"),
    (640, 360, "360p"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when neither dimension exceeds `bound`'s.
    pub fn fits_within(&self, bound: &Resolution) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTier {
    pub width: u32,
    pub height: u32,
    pub label: String,
}

impl ResolutionTier {
    pub fn new(width: u32, height: u32, label: impl Into<String>) -> Self {
        Self {
            width,
            height,
            label: label.into(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

pub fn default_ladder() -> Vec<ResolutionTier> {
    DEFAULT_LADDER
        .iter()
        .map(|&(w, h, label)| ResolutionTier::new(w, h, label))
        .collect()
}

/// Plan tiers for a source of (possibly unknown) resolution.
///
/// The source itself is always the first candidate when known, labeled `original`.
/// Ladder entries larger than the source in either dimension are skipped, duplicates
/// by `(width, height)` are dropped, and the result is ordered by descending area.
/// Never returns an empty list.
pub fn plan_tiers(source: Option<Resolution>, ladder: &[ResolutionTier]) -> Vec<ResolutionTier> {
    let source = source.filter(|r| !r.is_empty());
    let mut seen: HashSet<Resolution> = HashSet::new();
    let mut tiers = Vec::with_capacity(ladder.len() + 1);

    if let Some(src) = source {
        seen.insert(src);
        tiers.push(ResolutionTier::new(src.width, src.height, "original"));
    }

    for entry in ladder {
        let res = entry.resolution();
        if res.is_empty() {
            continue;
        }
        if let Some(src) = source
            && !res.fits_within(&src)
        {
            continue;
        }
        if seen.insert(res) {
            tiers.push(entry.clone());
        }
    }

    // Stable: on equal area the source keeps precedence.
    tiers.sort_by(|a, b| b.resolution().area().cmp(&a.resolution().area()));

    if tiers.is_empty() {
        let fallback = fallback_tier(source, ladder);
        log::warn!(
            target: "clipdrop::planner",
            "No resolution tiers fit the source; falling back to {} ({}x{})",
            fallback.label,
            fallback.width,
            fallback.height
        );
        tiers.push(fallback);
    }

    log::info!(
        target: "clipdrop::planner",
        "Resolution tiers to try: {}",
        tiers
            .iter()
            .map(|t| format!("{}={}x{}", t.label, t.width, t.height))
            .collect::<Vec<_>>()
            .join(", ")
    );
    tiers
}

fn fallback_tier(source: Option<Resolution>, ladder: &[ResolutionTier]) -> ResolutionTier {
    if let Some(src) = source {
        return ResolutionTier::new(src.width, src.height, "original_fallback");
    }
    ladder
        .iter()
        .filter(|t| !t.resolution().is_empty())
        .min_by_key(|t| t.resolution().area())
        .map(|t| ResolutionTier::new(t.width, t.height, format!("{}_fallback", t.label)))
        .unwrap_or_else(|| {
            let (w, h, label) = LAST_RESORT_TIER;
            ResolutionTier::new(w, h, label)
        })
}
