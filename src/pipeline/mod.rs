pub mod annotator;

pub use annotator::{AnnotateError, AnnotationReport, FrameAnnotator, ObjectOverlay};
