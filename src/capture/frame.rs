use std::fmt;
use std::time::Instant;

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::color::ColorSample;
use crate::detect::Region;

/// Decoded video frame, owned by exactly one pipeline stage at a time
#[derive(Debug)]
pub struct Frame {
    /// Pixel grid; channel order is given by `meta.format`
    pub pixels: RgbImage,

    /// Frame metadata, forwarded untouched to the sink
    pub meta: FrameMetadata,

    /// Arrival time for latency tracking
    pub received_at: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub format: PixelFormat,
    /// Presentation timestamp in `time_base` units
    pub pts: i64,
    pub time_base: TimeBase,
}

/// Pixel formats we annotate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

/// Rational number of seconds per timestamp tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// 90 kHz RTP video clock
    pub const VIDEO: TimeBase = TimeBase::new(1, 90_000);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl Frame {
    /// Blank (black) frame
    pub fn new(width: u32, height: u32, format: PixelFormat, pts: i64, time_base: TimeBase) -> Self {
        Self::from_pixels(RgbImage::new(width, height), format, pts, time_base)
    }

    pub fn from_pixels(pixels: RgbImage, format: PixelFormat, pts: i64, time_base: TimeBase) -> Self {
        Self {
            pixels,
            meta: FrameMetadata {
                sequence: 0,
                format,
                pts,
                time_base,
            },
            received_at: Instant::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.meta.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Whole-frame region
    pub fn bounds(&self) -> Region {
        Region::new(0, 0, self.width() as i32, self.height() as i32)
    }

    /// Color at (x, y) in RGB order, regardless of the native channel order.
    /// Caller guarantees the coordinate is inside the frame.
    pub fn sample(&self, x: u32, y: u32) -> ColorSample {
        let Rgb(channels) = *self.pixels.get_pixel(x, y);
        self.meta.format.decode(channels)
    }

    /// Paint a pixel given in RGB order
    pub fn put_sample(&mut self, x: u32, y: u32, color: ColorSample) {
        if x < self.width() && y < self.height() {
            let native = self.native(color);
            self.pixels.put_pixel(x, y, native);
        }
    }

    /// Convert an RGB color to this frame's channel order
    pub fn native(&self, color: ColorSample) -> Rgb<u8> {
        Rgb(self.meta.format.encode(color))
    }
}

impl PixelFormat {
    pub fn decode(self, [a, b, c]: [u8; 3]) -> ColorSample {
        match self {
            PixelFormat::Rgb24 => ColorSample::new(a, b, c),
            PixelFormat::Bgr24 => ColorSample::new(c, b, a),
        }
    }

    pub fn encode(self, color: ColorSample) -> [u8; 3] {
        match self {
            PixelFormat::Rgb24 => [color.r(), color.g(), color.b()],
            PixelFormat::Bgr24 => [color.b(), color.g(), color.r()],
        }
    }
}
