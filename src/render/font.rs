//! Font lookup and glyph rasterization
//!
//! Fonts are found by family name among `.ttf`/`.otf` files in the configured
//! font directories and the platform font directories. A missing family
//! falls back to a common system face, and finally to a built-in 8x8 bitmap
//! font so a watermark can always be drawn.

use ab_glyph::{Font, FontVec, PxScale, ScaleFont, point};
use font8x8::{BASIC_FONTS, UnicodeFonts};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Font file extensions considered during lookup
const FONT_EXTENSIONS: &[&str] = &["ttf", "otf"];

/// Faces tried, in order, when the requested family is not installed
const DEFAULT_FAMILIES: &[&str] = &[
    "Helvetica",
    "Arial",
    "DejaVu Sans",
    "Liberation Sans",
    "Noto Sans",
    "Segoe UI",
];

/// Size of the built-in bitmap glyph cell
const BITMAP_CELL: u32 = 8;

/// Measured extent of a line of text, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    /// Advance width from the pen origin to the trailing edge
    pub width: f32,
    /// Height above the baseline
    pub ascent: f32,
    /// Depth below the baseline (positive)
    pub descent: f32,
}

impl TextMetrics {
    pub fn height(&self) -> f32 {
        self.ascent + self.descent
    }
}

/// A loaded watermark face
pub enum WatermarkFont {
    /// TrueType/OpenType outline font
    Outline { name: String, font: FontVec },
    /// Built-in 8x8 bitmap font, scaled by whole pixels
    Bitmap,
}

impl std::fmt::Debug for WatermarkFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatermarkFont::Outline { name, .. } => f.debug_tuple("Outline").field(name).finish(),
            WatermarkFont::Bitmap => f.write_str("Bitmap"),
        }
    }
}

impl WatermarkFont {
    /// Load an outline font file
    pub fn load(path: &Path) -> Option<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                debug!(?path, error = %e, "Cannot read font file");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => Some(WatermarkFont::Outline {
                name: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                font,
            }),
            Err(e) => {
                debug!(?path, error = %e, "Not a usable font");
                None
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            WatermarkFont::Outline { name, .. } => name,
            WatermarkFont::Bitmap => "built-in bitmap",
        }
    }

    /// Measure `text` at `size` pixels
    pub fn measure(&self, text: &str, size: f32) -> TextMetrics {
        match self {
            WatermarkFont::Outline { font, .. } => {
                let scaled = font.as_scaled(PxScale::from(size));
                let mut width = 0.0;
                let mut previous = None;
                for c in text.chars() {
                    let id = scaled.glyph_id(c);
                    if let Some(prev) = previous {
                        width += scaled.kern(prev, id);
                    }
                    width += scaled.h_advance(id);
                    previous = Some(id);
                }
                TextMetrics {
                    width,
                    ascent: scaled.ascent(),
                    descent: -scaled.descent(),
                }
            }
            WatermarkFont::Bitmap => {
                let scale = u64::from(bitmap_scale(size));
                let cell = u64::from(BITMAP_CELL) * scale;
                let count = text.chars().count() as u64;
                let width = count
                    .saturating_mul(cell)
                    .saturating_add(count.saturating_sub(1).saturating_mul(scale));
                TextMetrics {
                    width: width as f32,
                    ascent: cell as f32,
                    descent: 0.0,
                }
            }
        }
    }

    /// Rasterize `text` with the pen at (0, 0) on the baseline.
    ///
    /// `plot` receives pixel offsets from the pen origin (negative `y` is
    /// above the baseline) and a coverage value in `[0, 1]`. Only pixels
    /// inside `clip` are produced; glyphs entirely outside it are skipped.
    pub fn rasterize<F>(&self, text: &str, size: f32, clip: PenClip, mut plot: F)
    where
        F: FnMut(i64, i64, f32),
    {
        if clip.is_empty() {
            return;
        }
        match self {
            WatermarkFont::Outline { font, .. } => {
                let scaled = font.as_scaled(PxScale::from(size));
                let mut caret = 0.0;
                let mut previous = None;
                for c in text.chars() {
                    let id = scaled.glyph_id(c);
                    if let Some(prev) = previous {
                        caret += scaled.kern(prev, id);
                    }
                    let glyph = id.with_scale_and_position(scaled.scale(), point(caret, 0.0));
                    caret += scaled.h_advance(id);
                    previous = Some(id);

                    let Some(outlined) = font.outline_glyph(glyph) else {
                        continue; // whitespace
                    };
                    let bounds = outlined.px_bounds();
                    let (left, top) = (bounds.min.x as i64, bounds.min.y as i64);
                    if !clip.intersects(left, top, bounds.max.x.ceil() as i64, bounds.max.y.ceil() as i64) {
                        continue;
                    }
                    outlined.draw(|gx, gy, coverage| {
                        let (x, y) = (left + i64::from(gx), top + i64::from(gy));
                        if clip.contains(x, y) {
                            plot(x, y, coverage);
                        }
                    });
                }
            }
            WatermarkFont::Bitmap => {
                let scale = i64::from(bitmap_scale(size));
                let cell = i64::from(BITMAP_CELL) * scale;
                if !clip.intersects(i64::MIN, -cell, i64::MAX, 0) {
                    return;
                }
                let mut cursor: i64 = 0;
                for c in text.chars() {
                    if cursor >= clip.right {
                        break;
                    }
                    if cursor.saturating_add(cell) <= clip.left {
                        cursor = cursor.saturating_add(cell + scale);
                        continue;
                    }
                    let glyph = BASIC_FONTS
                        .get(c)
                        .or_else(|| BASIC_FONTS.get('?'))
                        .unwrap_or([0; 8]);
                    for (row, bits) in glyph.iter().enumerate() {
                        let base_y = -cell + row as i64 * scale;
                        let (y0, y1) = (base_y.max(clip.top), (base_y + scale).min(clip.bottom));
                        if y0 >= y1 {
                            continue;
                        }
                        for col in 0..i64::from(BITMAP_CELL) {
                            if (bits >> col) & 1 == 0 {
                                continue;
                            }
                            let base_x = cursor + col * scale;
                            let (x0, x1) = (base_x.max(clip.left), (base_x + scale).min(clip.right));
                            for y in y0..y1 {
                                for x in x0..x1 {
                                    plot(x, y, 1.0);
                                }
                            }
                        }
                    }
                    cursor = cursor.saturating_add(cell + scale);
                }
            }
        }
    }
}

/// Visible rectangle relative to the pen origin, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenClip {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl PenClip {
    /// Unbounded clip
    pub const ALL: PenClip = PenClip {
        left: i64::MIN,
        top: i64::MIN,
        right: i64::MAX,
        bottom: i64::MAX,
    };

    /// The `width` x `height` canvas seen from a pen at (`x`, `baseline`)
    pub fn canvas(x: i32, baseline: i32, width: u32, height: u32) -> Self {
        let (x, baseline) = (i64::from(x), i64::from(baseline));
        PenClip {
            left: -x,
            top: -baseline,
            right: i64::from(width) - x,
            bottom: i64::from(height) - baseline,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    fn intersects(&self, left: i64, top: i64, right: i64, bottom: i64) -> bool {
        left < self.right && right > self.left && top < self.bottom && bottom > self.top
    }
}

/// Whole-pixel magnification of the 8x8 cell for a requested size
fn bitmap_scale(size: f32) -> u32 {
    ((size / BITMAP_CELL as f32).round() as u32).max(1)
}

/// Finds font files by family name
#[derive(Debug, Clone)]
pub struct FontResolver {
    search_dirs: Vec<PathBuf>,
}

impl FontResolver {
    /// Search `extra_dirs` first, then the platform font directories
    pub fn new(extra_dirs: &[PathBuf]) -> Self {
        let mut search_dirs = extra_dirs.to_vec();
        search_dirs.extend(Self::system_dirs());
        Self { search_dirs }
    }

    /// Search only the given directories
    pub fn with_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    pub fn system_dirs() -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if cfg!(target_os = "macos") {
            dirs.push(PathBuf::from("/System/Library/Fonts"));
            dirs.push(PathBuf::from("/Library/Fonts"));
            if let Some(home) = std::env::var_os("HOME") {
                dirs.push(PathBuf::from(home).join("Library/Fonts"));
            }
        } else if cfg!(windows) {
            let root = std::env::var_os("WINDIR").unwrap_or_else(|| "C:\\Windows".into());
            dirs.push(PathBuf::from(root).join("Fonts"));
        } else {
            dirs.push(PathBuf::from("/usr/share/fonts"));
            dirs.push(PathBuf::from("/usr/local/share/fonts"));
            if let Some(home) = std::env::var_os("HOME") {
                dirs.push(PathBuf::from(&home).join(".local/share/fonts"));
                dirs.push(PathBuf::from(home).join(".fonts"));
            }
        }
        dirs
    }

    /// Locate a font file for `family`.
    ///
    /// An exact file-stem match wins over a style variant
    /// (`Digital Display` matches `DigitalDisplay.ttf` before
    /// `digital-display-bold.otf`).
    pub fn find(&self, family: &str) -> Option<PathBuf> {
        let wanted = normalize(family);
        if wanted.is_empty() {
            return None;
        }

        let mut variant = None;
        for dir in self.search_dirs.iter().filter(|d| d.is_dir()) {
            for entry in WalkDir::new(dir).follow_links(true).into_iter().flatten() {
                let path = entry.path();
                if !entry.file_type().is_file() || !is_font_file(path) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let stem = normalize(stem);
                if stem == wanted {
                    return Some(path.to_path_buf());
                }
                if variant.is_none() && stem.starts_with(&wanted) {
                    variant = Some(path.to_path_buf());
                }
            }
        }
        variant
    }

    /// Load `family`, substituting a default face when it is missing.
    ///
    /// Never fails: the built-in bitmap font is the last resort.
    pub fn resolve(&self, family: &str) -> WatermarkFont {
        if let Some(font) = self.find(family).and_then(|p| WatermarkFont::load(&p)) {
            debug!(family, font = font.name(), "Resolved watermark font");
            return font;
        }

        for fallback in DEFAULT_FAMILIES {
            if let Some(font) = self.find(fallback).and_then(|p| WatermarkFont::load(&p)) {
                warn!(family, substitute = font.name(), "Font not found, using default face");
                return font;
            }
        }

        warn!(family, "No outline font available, using built-in bitmap font");
        WatermarkFont::Bitmap
    }
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| FONT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Lowercase and drop separators so "Digital Display" == "digital-display"
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Digital Display"), "digitaldisplay");
        assert_eq!(normalize("digital-display_Regular"), "digitaldisplayregular");
    }

    #[test]
    fn test_find_prefers_exact_stem() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("d");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("digital-display-bold.otf"), b"x").unwrap();
        fs::write(nested.join("DigitalDisplay.TTF"), b"x").unwrap();
        fs::write(dir.path().join("DigitalDisplay.txt"), b"x").unwrap();

        let resolver = FontResolver::with_dirs(vec![dir.path().to_path_buf()]);
        let found = resolver.find("Digital Display").unwrap();
        assert_eq!(found.file_name().unwrap(), "DigitalDisplay.TTF");
    }

    #[test]
    fn test_find_variant_when_no_exact() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Mono-Bold.ttf"), b"x").unwrap();

        let resolver = FontResolver::with_dirs(vec![dir.path().to_path_buf()]);
        assert!(resolver.find("mono").is_some());
        assert!(resolver.find("Sans").is_none());
        assert!(resolver.find("").is_none());
    }

    #[test]
    fn test_unloadable_font_falls_back() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Broken.ttf"), b"not a font").unwrap();

        let resolver = FontResolver::with_dirs(vec![dir.path().to_path_buf()]);
        assert!(matches!(resolver.resolve("Broken"), WatermarkFont::Bitmap));
    }

    #[test]
    fn test_bitmap_metrics() {
        let font = WatermarkFont::Bitmap;
        let m = font.measure("ab", 16.0);
        assert_eq!(m.width, 34.0);
        assert_eq!(m.ascent, 16.0);
        assert_eq!(m.height(), 16.0);

        // Tiny sizes still draw at one pixel per bit
        assert_eq!(font.measure("a", 1.0).width, 8.0);
        assert_eq!(font.measure("", 64.0).width, 0.0);
    }

    #[test]
    fn test_bitmap_rasterize_stays_in_box() {
        let font = WatermarkFont::Bitmap;
        let m = font.measure("2023", 24.0);
        let mut plotted = 0;
        font.rasterize("2023", 24.0, PenClip::ALL, |x, y, coverage| {
            assert!(x >= 0 && (x as f32) < m.width);
            assert!(y < 0 && (y as f32) >= -m.ascent);
            assert_eq!(coverage, 1.0);
            plotted += 1;
        });
        assert!(plotted > 0);
    }

    #[test]
    fn test_bitmap_huge_size_saturates() {
        let m = WatermarkFont::Bitmap.measure("2023-06-15", 1.0e9);
        assert!(m.width.is_finite());
        assert!(m.width >= m.ascent);
        assert!(WatermarkFont::Bitmap.measure("2023-06-15", f32::INFINITY).width > 0.0);
    }

    #[test]
    fn test_bitmap_rasterize_respects_clip() {
        let font = WatermarkFont::Bitmap;
        // Only the first glyph's top-left quadrant is visible
        let clip = PenClip {
            left: 0,
            top: -16,
            right: 8,
            bottom: -8,
        };
        let mut plotted = 0;
        font.rasterize("8888", 16.0, clip, |x, y, _| {
            assert!((0..8).contains(&x));
            assert!((-16..-8).contains(&y));
            plotted += 1;
        });
        assert!(plotted > 0);

        let mut outside = 0;
        font.rasterize("8888", 1.0e9, PenClip::canvas(-50, -50, 10, 10), |_, _, _| outside += 1);
        assert_eq!(outside, 0);
    }
}
