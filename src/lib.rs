pub mod capture;
pub mod color;
pub mod detect;
pub mod display;
pub mod pipeline;
pub mod session;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::{Frame, PixelFormat, TimeBase};
pub use color::{ColorSample, ColorStrategy};
pub use detect::{Detection, Detector, DetectorError, Region};
pub use pipeline::{AnnotationReport, FrameAnnotator};
pub use session::{ConnectionSession, SessionRegistry, SessionState};

/// Environment variables override file settings, e.g.
/// `HUECAST__ANNOTATOR__REFRESH_PERIOD=4`
pub const ENV_PREFIX: &str = "HUECAST";

/// Upper bound for the color sampling grid side
pub const MAX_WORKING_SIZE: u32 = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub annotator: AnnotatorConfig,
    pub session: SessionConfig,
    pub loopback: LoopbackConfig,
}

/// How many colors to sample per detected object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectPalette {
    /// Box in the dominant color only
    Dominant,
    /// Box plus a three-swatch side palette
    Top3,
}

impl ObjectPalette {
    pub fn color_count(self) -> usize {
        match self {
            ObjectPalette::Dominant => 1,
            ObjectPalette::Top3 => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    /// Run the detector every N frames, reuse its output in between
    pub refresh_period: u64,
    pub object_palette: ObjectPalette,
    pub color_strategy: ColorStrategy,
    /// Side of the square sampling grid used for color extraction
    pub working_size: u32,
    pub kmeans_iterations: usize,
    pub scene_colors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the outbound frame channel per peer
    pub track_buffer: usize,
    /// How long `close` waits for track loops before aborting them
    pub shutdown_timeout_ms: u64,
}

/// Synthetic stream used by the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames to send before hanging up; 0 streams until Ctrl-C
    pub frames: u64,
    pub format: PixelFormat,
    pub snapshot: Option<PathBuf>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            refresh_period: 2,
            object_palette: ObjectPalette::Dominant,
            color_strategy: ColorStrategy::Frequency,
            working_size: 100,
            kmeans_iterations: 10,
            scene_colors: 3,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            track_buffer: 8,
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30, // 30fps target
            frames: 90,
            format: PixelFormat::Bgr24,
            snapshot: Some(PathBuf::from("huecast-snapshot.png")),
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `HUECAST__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.into()));
        if self.annotator.refresh_period == 0 {
            return invalid("annotator.refresh_period must be at least 1");
        }
        if self.annotator.working_size == 0 || self.annotator.working_size > MAX_WORKING_SIZE {
            return invalid("annotator.working_size must be between 1 and 256");
        }
        if self.session.track_buffer == 0 {
            return invalid("session.track_buffer must be at least 1");
        }
        if self.loopback.fps == 0 {
            return invalid("loopback.fps must be at least 1");
        }
        Ok(())
    }
}
