//! Date watermark compositing
//!
//! Text is anchored bottom-right: its trailing edge sits `margin_right`
//! pixels from the right edge and its baseline `margin_bottom` pixels above
//! the bottom edge. The anchor is never clamped, so text that doesn't fit is
//! drawn partly (or entirely) off-canvas.

pub mod font;

use crate::config::WatermarkConfig;
use crate::error::{Error, Result};
use crate::time::DatePattern;
use chrono::NaiveDateTime;
use image::{ColorType, DynamicImage, GenericImageView, RgbaImage};
use imageproc::pixelops::weighted_sum;
use std::path::PathBuf;
use tracing::{debug, trace};

pub use font::{FontResolver, PenClip, TextMetrics, WatermarkFont};

/// Where a line of text lands on a canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextPlacement {
    /// Pen origin x (left edge of the text)
    pub x: i32,
    /// Baseline y
    pub baseline: i32,
    pub metrics: TextMetrics,
}

impl TextPlacement {
    /// Top edge of the text box
    pub fn top(&self) -> i32 {
        self.baseline - self.metrics.ascent.ceil() as i32
    }

    /// Trailing edge of the text box
    pub fn right(&self) -> i32 {
        self.x + self.metrics.width.ceil() as i32
    }
}

/// Draws the date watermark onto rasters
#[derive(Debug)]
pub struct WatermarkRenderer {
    font: WatermarkFont,
}

impl WatermarkRenderer {
    /// Resolve the configured font family once for the whole batch
    pub fn new(config: &WatermarkConfig, font_dirs: &[PathBuf]) -> Self {
        let font = FontResolver::new(font_dirs).resolve(&config.font_family);
        Self { font }
    }

    pub fn with_font(font: WatermarkFont) -> Self {
        Self { font }
    }

    pub fn font(&self) -> &WatermarkFont {
        &self.font
    }

    /// Bottom-right anchor for `text` on a `width` x `height` canvas
    pub fn place(&self, text: &str, config: &WatermarkConfig, width: u32, height: u32) -> TextPlacement {
        let metrics = self.font.measure(text, config.font_size);
        let x = width as i64 - config.margin_right as i64 - metrics.width.ceil() as i64;
        let baseline = height as i64 - config.margin_bottom as i64;

        TextPlacement {
            x: saturate(x),
            baseline: saturate(baseline),
            metrics,
        }
    }

    /// Render `date` through the configured pattern and draw it on a copy of `raster`
    pub fn compose(
        &self,
        raster: &DynamicImage,
        date: &NaiveDateTime,
        config: &WatermarkConfig,
    ) -> Result<DynamicImage> {
        let text = DatePattern::new(&config.date_format).format(date);
        self.compose_text(raster, &text, config)
    }

    /// Draw `text` on a copy of `raster`; the input is never modified
    pub fn compose_text(
        &self,
        raster: &DynamicImage,
        text: &str,
        config: &WatermarkConfig,
    ) -> Result<DynamicImage> {
        let (width, height) = raster.dimensions();
        let placement = self.place(text, config, width, height);
        debug!(
            text,
            x = placement.x,
            baseline = placement.baseline,
            text_width = placement.metrics.width,
            "Placing watermark"
        );

        let mut canvas = rgba_copy(raster)?;

        let color = config.text_color.opaque_rgba8();
        let opacity = config.text_color.alpha();
        let clip = PenClip::canvas(placement.x, placement.baseline, width, height);
        let mut drawn = 0usize;
        self.font.rasterize(text, config.font_size, clip, |dx, dy, coverage| {
            let px = i64::from(placement.x) + dx;
            let py = i64::from(placement.baseline) + dy;
            if px < 0 || py < 0 || px >= i64::from(width) || py >= i64::from(height) {
                return;
            }
            let alpha = (coverage * opacity).clamp(0.0, 1.0);
            if alpha <= 0.0 {
                return;
            }
            let pixel = canvas.get_pixel_mut(px as u32, py as u32);
            *pixel = weighted_sum(*pixel, color, 1.0 - alpha, alpha);
            drawn += 1;
        });
        trace!(drawn, "Watermark pixels blended");

        Ok(restore_color_type(canvas, raster.color()))
    }
}

fn saturate(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Copy a raster into a fresh RGBA8 buffer, reporting allocation failure
fn rgba_copy(raster: &DynamicImage) -> Result<RgbaImage> {
    let (width, height) = raster.dimensions();
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::Composition(format!("canvas {}x{} is too large", width, height)))?;

    let mut data: Vec<u8> = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        Error::Composition(format!("cannot allocate {}x{} canvas: {}", width, height, e))
    })?;

    match raster {
        DynamicImage::ImageRgba8(rgba) => data.extend_from_slice(rgba.as_raw()),
        other => {
            for (_, _, pixel) in other.pixels() {
                data.extend_from_slice(&pixel.0);
            }
        }
    }

    RgbaImage::from_raw(width, height, data)
        .ok_or_else(|| Error::Composition("canvas buffer size mismatch".to_string()))
}

/// Bring the composed canvas back to the source's channel layout
fn restore_color_type(canvas: RgbaImage, color: ColorType) -> DynamicImage {
    let canvas = DynamicImage::ImageRgba8(canvas);
    match color {
        ColorType::L8 => DynamicImage::ImageLuma8(canvas.into_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(canvas.into_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(canvas.into_rgb8()),
        ColorType::L16 => DynamicImage::ImageLuma16(canvas.into_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(canvas.into_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(canvas.into_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(canvas.into_rgba16()),
        _ => canvas,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TextColor;
    use image::{Rgb, RgbImage};

    fn config(margin_right: u32, margin_bottom: u32) -> WatermarkConfig {
        WatermarkConfig {
            font_size: 16.0,
            text_color: TextColor::new(1.0, 1.0, 1.0, 1.0),
            margin_right,
            margin_bottom,
            ..WatermarkConfig::default()
        }
    }

    fn black(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([0, 0, 0])))
    }

    /// Bounding box of every pixel that differs from black
    fn changed_box(image: &DynamicImage) -> Option<(u32, u32, u32, u32)> {
        let rgb = image.to_rgb8();
        let mut bbox: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in rgb.enumerate_pixels() {
            if p.0 != [0, 0, 0] {
                bbox = Some(match bbox {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        bbox
    }

    #[test]
    fn test_placement_is_bottom_right() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let placement = renderer.place("1", &config(40, 40), 200, 100);

        // Bitmap "1" at 16px is a 16x16 cell
        assert_eq!(placement.x, 200 - 40 - 16);
        assert_eq!(placement.baseline, 100 - 40);
        assert_eq!(placement.right(), 200 - 40);
        assert_eq!(placement.top(), 100 - 40 - 16);
    }

    #[test]
    fn test_compose_draws_inside_anchor_box() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let source = black(200, 100);

        let out = renderer.compose_text(&source, "88", &config(40, 40)).unwrap();
        let (x0, y0, x1, y1) = changed_box(&out).unwrap();
        let placement = renderer.place("88", &config(40, 40), 200, 100);

        assert!(x0 as i32 >= placement.x);
        assert!((x1 as i32) < placement.right());
        assert!(y0 as i32 >= placement.top());
        assert!((y1 as i32) < placement.baseline);

        // Copy-on-write
        assert!(changed_box(&source).is_none());
        assert_eq!(out.color(), ColorType::Rgb8);
    }

    #[test]
    fn test_compose_formats_date() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let date = NaiveDateTime::parse_from_str("2023-06-15 10:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let mut cfg = config(10, 10);
        cfg.date_format = "yyyy-MM-dd".to_string();

        let via_date = renderer.compose(&black(300, 60), &date, &cfg).unwrap();
        let via_text = renderer.compose_text(&black(300, 60), "2023-06-15", &cfg).unwrap();
        assert_eq!(via_date.to_rgb8(), via_text.to_rgb8());
    }

    #[test]
    fn test_same_offset_on_every_size() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let cfg = config(40, 40);
        for (w, h) in [(120, 80), (640, 480), (1001, 333)] {
            let out = renderer.compose_text(&black(w, h), "8", &cfg).unwrap();
            let (_, _, x1, y1) = changed_box(&out).unwrap();
            // Ink stops a few pixels inside the 16px cell
            assert!(w - 1 - x1 >= 40);
            assert!(h - 1 - y1 >= 40);
            assert!(w - 1 - x1 < 40 + 16);
            assert!(h - 1 - y1 < 40 + 16);
        }
    }

    #[test]
    fn test_overflowing_text_is_not_repositioned() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let source = black(10, 10);

        // Anchor lands left of and above the canvas; nothing visible, no panic
        let out = renderer.compose_text(&source, "2023-06-15", &config(40, 40)).unwrap();
        assert!(changed_box(&out).is_none());
        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn test_transparent_color_leaves_pixels() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let mut cfg = config(5, 5);
        cfg.text_color = TextColor::new(1.0, 0.0, 0.0, 0.0);

        let out = renderer.compose_text(&black(100, 40), "1", &cfg).unwrap();
        assert!(changed_box(&out).is_none());
    }

    #[test]
    fn test_preserves_luma_layout() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let gray = DynamicImage::ImageLuma8(image::GrayImage::new(64, 32));
        let out = renderer.compose_text(&gray, "1", &config(4, 4)).unwrap();
        assert_eq!(out.color(), ColorType::L8);
    }

    #[test]
    fn test_oversized_text_is_cheap_and_invisible() {
        let renderer = WatermarkRenderer::with_font(WatermarkFont::Bitmap);
        let mut cfg = config(40, 40);
        cfg.font_size = 8000.0;
        let out = renderer.compose_text(&black(100, 100), "2023-06-15", &cfg).unwrap();
        assert!(changed_box(&out).is_none());

        cfg.font_size = 1.0e9;
        let placement = renderer.place("2023-06-15", &cfg, 100, 100);
        assert!(placement.x < 0);
        let out = renderer.compose_text(&black(100, 100), "2023-06-15", &cfg).unwrap();
        assert!(changed_box(&out).is_none());
    }
}
