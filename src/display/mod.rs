pub mod overlay;
pub mod palette;

pub use palette::draw_palette;
