//! Progress aggregation: maps per-stage completion onto a single 0-100 scale.
//!
//! Layout with default settings: tier loop 0-90 (split evenly across tiers, and
//! in halves for 2-pass), recovery 90-95, upload 95-100. Emitted values never
//! decrease except for an explicit `reset`.

use std::cell::Cell;
use std::sync::Arc;

use crate::config::CompressSettings;

pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// A sub-range of the 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    pub start: f64,
    pub end: f64,
}

impl Phase {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    /// Linear interpolation of a 0-100 sub-step percent into this phase.
    pub fn at_percent(&self, percent: u8) -> f64 {
        self.start + self.span() * f64::from(percent.min(100)) / 100.0
    }

    /// The `index`-th of `count` equal slices.
    pub fn slice(&self, index: usize, count: usize) -> Phase {
        let count = count.max(1) as f64;
        let width = self.span() / count;
        let start = self.start + width * index as f64;
        Phase::new(start, start + width)
    }
}

/// Where each pipeline stage lands on the caller's scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhasePlan {
    pub compression: Phase,
    pub recovery: Phase,
    pub upload: Phase,
}

impl PhasePlan {
    pub fn from_settings(settings: &CompressSettings) -> Self {
        let compression_end = f64::from(settings.compression_progress_share.min(100));
        let recovery_end =
            (compression_end + f64::from(settings.recovery_progress_share)).min(100.0);
        Self {
            compression: Phase::new(0.0, compression_end),
            recovery: Phase::new(compression_end, recovery_end),
            upload: Phase::new(recovery_end, 100.0),
        }
    }
}

/// Forwards monotonic integer progress to an optional caller sink.
///
/// Lives on the pipeline thread; the sink is only ever invoked from there.
pub struct ProgressAggregator {
    sink: Option<ProgressCallback>,
    last: Cell<u8>,
}

impl ProgressAggregator {
    pub fn new(sink: Option<ProgressCallback>) -> Self {
        Self {
            sink,
            last: Cell::new(0),
        }
    }

    pub fn current(&self) -> u8 {
        self.last.get()
    }

    /// Report an absolute position on the 0-100 scale. Values at or below the last
    /// emitted one are dropped.
    pub fn report(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let value = value.round().clamp(0.0, 100.0) as u8;
        if value <= self.last.get() {
            return;
        }
        self.last.set(value);
        self.emit(value);
    }

    pub fn report_in(&self, phase: Phase, percent: u8) {
        self.report(phase.at_percent(percent));
    }

    pub fn complete(&self, phase: Phase) {
        self.report(phase.end);
    }

    /// Back to 0 after a fatal failure or cancellation.
    pub fn reset(&self) {
        self.last.set(0);
        self.emit(0);
    }

    fn emit(&self, value: u8) {
        log::trace!(target: "clipdrop::progress", "progress {}", value);
        if let Some(sink) = &self.sink {
            sink(value);
        }
    }
}
