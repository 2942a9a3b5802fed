//! Object detection seam and per-track detection cache

pub mod cache;

use thiserror::Error;

use crate::capture::Frame;

pub use cache::{DetectionCache, DetectionCacheEntry};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// The model could not be loaded or initialised; detection stays off for
    /// the rest of the session
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("detector panicked: {0}")]
    Panicked(String),
}

/// Object detection backend.
///
/// Shared by every session in the process, so implementations that need
/// mutable state must synchronise internally.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Axis-aligned pixel rectangle, `x2`/`y2` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Region {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        (self.x2 as i64 - self.x1 as i64).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 as i64 - self.y1 as i64).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Intersect with a `width`×`height` frame. `None` if nothing is left.
    pub fn clip(self, width: u32, height: u32) -> Option<Region> {
        let max_x = width.min(i32::MAX as u32) as i32;
        let max_y = height.min(i32::MAX as u32) as i32;
        let clipped = Region {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
        };
        (!clipped.is_empty()).then_some(clipped)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub region: Region,
    pub label: String,
    /// In [0, 1]
    pub confidence: f32,
}

impl Detection {
    pub fn new(region: Region, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            region,
            label: label.into(),
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            },
        }
    }
}
