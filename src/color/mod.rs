//! Color samples, reference-palette naming and dominant-color extraction

pub mod extract;
pub mod names;

use std::fmt;

use thiserror::Error;

pub use extract::{ColorExtractor, ColorStrategy};
pub use names::NamedColor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    #[error("expected 3 color channels, got {0}")]
    Arity(usize),
}

/// An (R, G, B) triple. Channels are `u8`, so every sample is in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorSample(pub [u8; 3]);

impl ColorSample {
    /// Neutral "no data" sentinel returned for empty regions
    pub const WHITE: ColorSample = ColorSample([255, 255, 255]);
    pub const BLACK: ColorSample = ColorSample([0, 0, 0]);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// Round and clamp floating point channels into range
    pub fn from_f32(r: f32, g: f32, b: f32) -> Self {
        let clamp = |c: f32| c.round().clamp(0.0, 255.0) as u8;
        Self([clamp(r), clamp(g), clamp(b)])
    }

    pub fn r(self) -> u8 {
        self.0[0]
    }

    pub fn g(self) -> u8 {
        self.0[1]
    }

    pub fn b(self) -> u8 {
        self.0[2]
    }

    /// Six lower-case hex digits, no prefix
    pub fn hex(self) -> String {
        format!("{:02x}{:02x}{:02x}", self.r(), self.g(), self.b())
    }

    pub fn distance_sq(self, other: ColorSample) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(&a, &b)| {
                let d = a as i32 - b as i32;
                (d * d) as u32
            })
            .sum()
    }
}

impl AsRef<[u8]> for ColorSample {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for ColorSample {
    type Error = ColorError;

    fn try_from(channels: &[u8]) -> Result<Self, Self::Error> {
        match *channels {
            [r, g, b] => Ok(Self::new(r, g, b)),
            _ => Err(ColorError::Arity(channels.len())),
        }
    }
}

impl fmt::Display for ColorSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.hex())
    }
}
