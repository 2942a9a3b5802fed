use tracing::trace;

use super::overlay;
use crate::capture::Frame;
use crate::color::{ColorSample, NamedColor};

pub const SWATCH_SIZE: u32 = 20;
pub const SWATCH_PITCH: i32 = 25;
const LABEL_OFFSET_X: i32 = 30;
const LABEL_OFFSET_Y: i32 = 6;

/// Draw one swatch per color, stacked downwards from the anchor, each
/// followed by its "{name} #{hex}" label.
///
/// Entries that are not a 3-channel triple are skipped; their slot stays
/// empty.
pub fn draw_palette<C: AsRef<[u8]>>(frame: &mut Frame, colors: &[C], anchor_x: i32, anchor_y: i32) {
    for (i, channels) in colors.iter().enumerate() {
        let color = match ColorSample::try_from(channels.as_ref()) {
            Ok(color) => color,
            Err(e) => {
                trace!(slot = i, "Skipping swatch: {}", e);
                continue;
            }
        };

        let y = anchor_y + SWATCH_PITCH * i as i32;
        overlay::fill_rect(frame, anchor_x, y, SWATCH_SIZE, SWATCH_SIZE, color);

        let label = NamedColor::from(color).to_string();
        overlay::text(
            frame,
            &label,
            anchor_x + LABEL_OFFSET_X,
            y + LABEL_OFFSET_Y,
            1,
            ColorSample::WHITE,
        );
    }
}
