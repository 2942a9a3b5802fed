//! Per-frame overlay: scene palette, then one box per detected object

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{instrument, trace, warn};

use crate::capture::Frame;
use crate::color::{ColorExtractor, ColorSample};
use crate::detect::{Detection, DetectionCache, Detector, DetectorError, Region};
use crate::display::{draw_palette, overlay};
use crate::{AnnotatorConfig, ObjectPalette};

const SCENE_CAPTION: &str = "Scene Colors:";
const SCENE_CAPTION_POS: (i32, i32) = (10, 20);
const SCENE_PALETTE_POS: (i32, i32) = (10, 40);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 2;
const SIDE_PALETTE_GAP: i32 = 10;

/// A failed annotation step. The frame is still forwarded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnnotateError {
    #[error("frame has no pixels")]
    EmptyFrame,
    #[error("detection failed: {0}")]
    Detection(#[from] DetectorError),
}

/// What was drawn on a frame, and which steps failed
#[derive(Debug, Clone, Default)]
pub struct AnnotationReport {
    pub scene_colors: Vec<ColorSample>,
    pub objects: Vec<ObjectOverlay>,
    pub errors: Vec<AnnotateError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectOverlay {
    /// Region after clipping to the frame
    pub region: Region,
    pub label: String,
    pub confidence: f32,
    /// Most prevalent first; the box is drawn in `colors[0]`
    pub colors: Vec<ColorSample>,
}

pub struct FrameAnnotator {
    extractor: ColorExtractor,
    cache: DetectionCache,
    detector: Option<Arc<dyn Detector>>,
    refresh_period: u64,
    scene_colors: usize,
    object_palette: ObjectPalette,
}

impl FrameAnnotator {
    pub fn new(config: &AnnotatorConfig, detector: Option<Arc<dyn Detector>>) -> Self {
        Self {
            extractor: ColorExtractor::new(
                config.color_strategy,
                config.working_size,
                config.kmeans_iterations,
            ),
            cache: DetectionCache::new(),
            detector,
            refresh_period: config.refresh_period,
            scene_colors: config.scene_colors,
            object_palette: config.object_palette,
        }
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Draw overlays onto `frame` in place. Timestamp and time base are left
    /// untouched. Step failures are logged and reported, never propagated.
    #[instrument(level = "trace", skip(self, frame), fields(pts = frame.meta.pts))]
    pub fn annotate(&mut self, frame: &mut Frame, frame_index: u64) -> AnnotationReport {
        let started = Instant::now();
        let mut report = AnnotationReport::default();

        match self.scene_palette(frame) {
            Ok(colors) => report.scene_colors = colors,
            Err(e) => report.errors.push(e),
        }

        let detections = match self.detections(frame, frame_index) {
            Ok(detections) => detections,
            Err(e) => {
                report.errors.push(e);
                self.cache.current().detections.clone()
            }
        };

        for detection in detections.iter() {
            if let Some(object) = self.object_overlay(frame, detection) {
                report.objects.push(object);
            }
        }

        for e in &report.errors {
            warn!(frame_index, "Annotation step failed: {}", e);
        }
        metrics::counter!("annotation_step_failures").increment(report.errors.len() as u64);
        metrics::histogram!("annotate_time_us").record(started.elapsed().as_micros() as f64);

        report
    }

    fn scene_palette(&self, frame: &mut Frame) -> Result<Vec<ColorSample>, AnnotateError> {
        let bounds = frame.bounds();
        if bounds.is_empty() {
            return Err(AnnotateError::EmptyFrame);
        }

        let colors = self.extractor.top_colors(frame, bounds, self.scene_colors);
        let (x, y) = SCENE_CAPTION_POS;
        overlay::text(frame, SCENE_CAPTION, x, y, LABEL_SCALE, ColorSample::WHITE);
        let (x, y) = SCENE_PALETTE_POS;
        draw_palette(frame, &colors, x, y);
        Ok(colors)
    }

    fn detections(&mut self, frame: &Frame, frame_index: u64) -> Result<Arc<[Detection]>, AnnotateError> {
        let detections = self.cache.refresh_or_reuse(
            frame,
            frame_index,
            self.detector.as_deref(),
            self.refresh_period,
        )?;
        Ok(detections)
    }

    fn object_overlay(&self, frame: &mut Frame, detection: &Detection) -> Option<ObjectOverlay> {
        let Some(region) = detection.region.clip(frame.width(), frame.height()) else {
            trace!(label = %detection.label, "Skipping detection outside the frame");
            return None;
        };

        let colors = self
            .extractor
            .top_colors(frame, region, self.object_palette.color_count());
        let dominant = colors.first().copied()?;

        overlay::outline(frame, region, BOX_THICKNESS, dominant);

        let label_height = overlay::GLYPH_SIZE * LABEL_SCALE as i32;
        let (label_x, label_y) = if region.y1 >= label_height + 2 {
            (region.x1, region.y1 - label_height - 2)
        } else {
            (region.x1 + BOX_THICKNESS as i32 + 2, region.y1 + BOX_THICKNESS as i32 + 2)
        };
        overlay::text(frame, &detection.label, label_x, label_y, LABEL_SCALE, dominant);

        if self.object_palette == ObjectPalette::Top3 {
            draw_palette(frame, &colors, region.x2 + SIDE_PALETTE_GAP, region.y1);
        }

        Some(ObjectOverlay {
            region,
            label: detection.label.clone(),
            confidence: detection.confidence,
            colors,
        })
    }
}
