use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Detection, Detector, DetectorError};
use crate::capture::Frame;

/// Last detection pass and how many frames ago it ran
#[derive(Debug, Clone)]
pub struct DetectionCacheEntry {
    pub detections: Arc<[Detection]>,
    pub age: u64,
}

impl Default for DetectionCacheEntry {
    fn default() -> Self {
        Self {
            detections: Arc::from(Vec::new()),
            age: 0,
        }
    }
}

/// Memoizes detector output between refreshes. One per video track.
#[derive(Debug, Default)]
pub struct DetectionCache {
    entry: DetectionCacheEntry,
    disabled: bool,
    runs: u64,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detections for frame `frame_index`.
    ///
    /// The detector runs on frame 0 and every `refresh_period`-th frame after
    /// it; other frames get the cached pass back unchanged. Without a usable
    /// detector the result is always empty.
    pub fn refresh_or_reuse(
        &mut self,
        frame: &Frame,
        frame_index: u64,
        detector: Option<&dyn Detector>,
        refresh_period: u64,
    ) -> Result<Arc<[Detection]>, DetectorError> {
        let Some(detector) = detector.filter(|_| !self.disabled) else {
            return Ok(self.entry.detections.clone());
        };

        if frame_index != 0 && frame_index % refresh_period.max(1) != 0 {
            self.entry.age += 1;
            return Ok(self.entry.detections.clone());
        }

        self.runs += 1;
        metrics::counter!("detector_runs").increment(1);
        match run_detector(detector, frame) {
            Ok(detections) => {
                debug!(frame_index, count = detections.len(), "Detections refreshed");
                self.entry = DetectionCacheEntry {
                    detections: detections.into(),
                    age: 0,
                };
                Ok(self.entry.detections.clone())
            }
            Err(DetectorError::Unavailable(reason)) => {
                warn!(%reason, "Detector unavailable, continuing color-only");
                self.disabled = true;
                self.entry = DetectionCacheEntry::default();
                Ok(self.entry.detections.clone())
            }
            Err(e) => {
                self.entry.age += 1;
                Err(e)
            }
        }
    }

    /// Most recent successful pass, however stale
    pub fn current(&self) -> &DetectionCacheEntry {
        &self.entry
    }

    /// Number of detector invocations so far
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

fn run_detector(detector: &dyn Detector, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
    panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        Err(DetectorError::Panicked(message))
    })
}
