//! Drawing primitives on top of [`Frame`] pixels
//!
//! Colors are always given in RGB order and converted to the frame's native
//! channel order here. Everything is clipped to the frame.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::capture::Frame;
use crate::color::ColorSample;
use crate::detect::Region;

/// Glyph cell size at scale 1
pub const GLYPH_SIZE: i32 = 8;

pub fn fill_rect(frame: &mut Frame, x: i32, y: i32, width: u32, height: u32, color: ColorSample) {
    if width == 0 || height == 0 {
        return;
    }
    let native = frame.native(color);
    draw_filled_rect_mut(&mut frame.pixels, Rect::at(x, y).of_size(width, height), native);
}

/// Box outline drawn inwards from the region's edges
pub fn outline(frame: &mut Frame, region: Region, thickness: u32, color: ColorSample) {
    let native = frame.native(color);
    for inset in 0..thickness {
        let inset = inset as i32;
        let rect = Region::new(
            region.x1 + inset,
            region.y1 + inset,
            region.x2 - inset,
            region.y2 - inset,
        );
        if rect.is_empty() {
            break;
        }
        draw_hollow_rect_mut(
            &mut frame.pixels,
            Rect::at(rect.x1, rect.y1).of_size(rect.width(), rect.height()),
            native,
        );
    }
}

/// Render `text` with its top-left corner at (x, y). Characters outside the
/// basic Latin block are drawn as `?`.
pub fn text(frame: &mut Frame, text: &str, x: i32, y: i32, scale: u32, color: ColorSample) {
    let scale = scale.max(1);
    let step = GLYPH_SIZE * scale as i32;

    for (i, ch) in text.chars().enumerate() {
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = x + i as i32 * step;
        if origin_x >= frame.width() as i32 {
            break;
        }

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                fill_rect(
                    frame,
                    origin_x + col * scale as i32,
                    y + row as i32 * scale as i32,
                    scale,
                    scale,
                    color,
                );
            }
        }
    }
}

/// Width in pixels of `text` rendered at `scale`
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE as u32 * scale.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelFormat, TimeBase};

    fn blank() -> Frame {
        Frame::new(64, 64, PixelFormat::Bgr24, 0, TimeBase::VIDEO)
    }

    #[test]
    fn outline_paints_edges_only() {
        let mut frame = blank();
        let red = ColorSample::new(255, 0, 0);
        outline(&mut frame, Region::new(10, 10, 50, 50), 2, red);

        assert_eq!(frame.sample(30, 10), red);
        assert_eq!(frame.sample(30, 11), red);
        assert_eq!(frame.sample(49, 30), red);
        assert_eq!(frame.sample(30, 30), ColorSample::BLACK);
        assert_eq!(frame.sample(30, 12), ColorSample::BLACK);
        // stored in native channel order
        assert_eq!(frame.pixels.get_pixel(10, 10).0, [0, 0, 255]);
    }

    #[test]
    fn shapes_are_clipped_to_the_frame() {
        let mut frame = blank();
        let white = ColorSample::WHITE;
        fill_rect(&mut frame, 60, 60, 20, 20, white);
        outline(&mut frame, Region::new(-5, -5, 100, 100), 2, white);
        text(&mut frame, "clipped", 50, -4, 2, white);

        assert_eq!(frame.sample(63, 63), white);
    }

    #[test]
    fn text_draws_some_pixels() {
        let mut frame = blank();
        text(&mut frame, "A", 0, 0, 1, ColorSample::WHITE);

        let lit = (0..8)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.sample(x, y) == ColorSample::WHITE)
            .count();
        assert!(lit > 0);
        assert_eq!(frame.sample(20, 20), ColorSample::BLACK);
    }

    #[test]
    fn text_width_scales() {
        assert_eq!(text_width("cup", 1), 24);
        assert_eq!(text_width("cup", 2), 48);
    }
}
