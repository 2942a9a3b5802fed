use std::fmt;

use super::ColorSample;

/// HTML 4 color keywords, in lexical order. Nearest-match ties resolve to the
/// earliest entry.
const REFERENCE_PALETTE: [(&str, ColorSample); 16] = [
    ("aqua", ColorSample::new(0x00, 0xff, 0xff)),
    ("black", ColorSample::new(0x00, 0x00, 0x00)),
    ("blue", ColorSample::new(0x00, 0x00, 0xff)),
    ("fuchsia", ColorSample::new(0xff, 0x00, 0xff)),
    ("gray", ColorSample::new(0x80, 0x80, 0x80)),
    ("green", ColorSample::new(0x00, 0x80, 0x00)),
    ("lime", ColorSample::new(0x00, 0xff, 0x00)),
    ("maroon", ColorSample::new(0x80, 0x00, 0x00)),
    ("navy", ColorSample::new(0x00, 0x00, 0x80)),
    ("olive", ColorSample::new(0x80, 0x80, 0x00)),
    ("purple", ColorSample::new(0x80, 0x00, 0x80)),
    ("red", ColorSample::new(0xff, 0x00, 0x00)),
    ("silver", ColorSample::new(0xc0, 0xc0, 0xc0)),
    ("teal", ColorSample::new(0x00, 0x80, 0x80)),
    ("white", ColorSample::new(0xff, 0xff, 0xff)),
    ("yellow", ColorSample::new(0xff, 0xff, 0x00)),
];

/// Color with its hex code and nearest reference name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedColor {
    pub rgb: ColorSample,
    pub hex: String,
    pub name: &'static str,
}

impl From<ColorSample> for NamedColor {
    fn from(rgb: ColorSample) -> Self {
        Self {
            rgb,
            hex: rgb.hex(),
            name: nearest_name(rgb),
        }
    }
}

/// Palette label text
impl fmt::Display for NamedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.name, self.hex)
    }
}

/// Nearest reference color by squared Euclidean distance in RGB
pub fn nearest_name(rgb: ColorSample) -> &'static str {
    REFERENCE_PALETTE
        .iter()
        .min_by_key(|(_, reference)| reference.distance_sq(rgb))
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}
