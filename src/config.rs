//! Configuration types for photomark

use image::Rgba;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Extensions accepted into a batch (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic"];

/// Check if a file extension is accepted into a batch
pub fn is_supported_extension(ext: &str) -> bool {
    let ext_lower = ext.to_lowercase();
    SUPPORTED_EXTENSIONS.iter().any(|e| *e == ext_lower)
}

/// Check if a path carries an accepted extension
pub fn is_supported_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_supported_extension)
}

/// RGBA text color with every channel normalized to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextColor(pub [f32; 4]);

impl TextColor {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self([r, g, b, a])
    }

    /// Color with alpha forced to 1.0, as 8-bit channels
    pub fn opaque_rgba8(&self) -> Rgba<u8> {
        let [r, g, b, _] = self.0;
        Rgba([to_u8(r), to_u8(g), to_u8(b), 255])
    }

    /// Alpha channel in `[0, 1]`
    pub fn alpha(&self) -> f32 {
        self.0[3].clamp(0.0, 1.0)
    }
}

fn to_u8(channel: f32) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl FromStr for TextColor {
    type Err = String;

    /// Parse `r,g,b` or `r,g,b,a` with normalized channels
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f32> = s
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid color component in '{}': {}", s, e))?;

        match parts.as_slice() {
            [r, g, b] => Ok(Self::new(*r, *g, *b, 1.0)),
            [r, g, b, a] => Ok(Self::new(*r, *g, *b, *a)),
            _ => Err(format!(
                "expected 3 or 4 comma-separated components, got {}",
                parts.len()
            )),
        }
    }
}

/// Watermark appearance and destination, fixed for the duration of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Date pattern (`yyyy-MM-dd` style, or strftime when it contains `%`)
    pub date_format: String,

    /// Font family name; an unknown family falls back to the built-in font
    pub font_family: String,

    /// Font size in absolute pixels
    pub font_size: f32,

    /// Text color, normalized RGBA
    pub text_color: TextColor,

    /// Pixels between the image's right edge and the text's right edge
    pub margin_right: u32,

    /// Pixels between the image's bottom edge and the text baseline
    pub margin_bottom: u32,

    /// Directory processed files are written to (created if absent)
    pub output_directory: PathBuf,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            date_format: "yyyy-MM-dd".to_string(),
            font_family: "Digital Display".to_string(),
            font_size: 64.0,
            text_color: TextColor::new(0.745, 0.529, 0.314, 1.0),
            margin_right: 40,
            margin_bottom: 40,
            output_directory: PathBuf::from("watermarked"),
        }
    }
}

impl WatermarkConfig {
    /// Structural checks needed before rendering can start
    pub fn validate(&self) -> Result<(), String> {
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(format!("font size must be positive, got {}", self.font_size));
        }
        if self
            .text_color
            .0
            .iter()
            .any(|c| !c.is_finite() || !(0.0..=1.0).contains(c))
        {
            return Err(format!(
                "color channels must be within [0, 1], got {:?}",
                self.text_color.0
            ));
        }
        if self.date_format.trim().is_empty() {
            return Err("date format must not be empty".to_string());
        }
        Ok(())
    }
}

/// Complete configuration for a photomark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watermark appearance and output directory
    pub watermark: WatermarkConfig,

    /// Number of worker threads (0 = auto)
    pub threads: usize,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Drop inputs resolving to an already accepted canonical path
    pub deduplicate: bool,

    /// Append a numeric suffix when an output name is already taken
    pub unique_names: bool,

    /// Copy the source modification time onto the output file
    pub preserve_mtime: bool,

    /// Use the file creation time when a photo has no EXIF date
    pub file_time_fallback: bool,

    /// Expand directory inputs recursively
    pub recursive: bool,

    /// Extra directories searched for font files
    pub font_dirs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watermark: WatermarkConfig::default(),
            threads: 0, // Auto-detect
            jpeg_quality: 90,
            deduplicate: false,
            unique_names: false,
            preserve_mtime: true,
            file_time_fallback: true,
            recursive: false,
            font_dirs: vec![],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# photomark configuration file
# This file uses TOML format (https://toml.io)

# Number of worker threads (0 = one per CPU core)
threads = 0

# JPEG quality for JPEG outputs (1-100)
jpeg_quality = 90

# Skip inputs that resolve to the same file as an earlier input
deduplicate = false

# Append _1, _2, ... when two outputs would get the same name
# (names carry a one-second timestamp, so same-named photos can collide)
unique_names = false

# Copy each source file's modification time onto its output
preserve_mtime = true

# Date photos without EXIF by their file creation time
# (false: such photos are copied without a watermark)
file_time_fallback = true

# Descend into sub-folders when a folder is given as input
recursive = false

# Extra folders to search for the font family below
font_dirs = []

[watermark]
# Unicode date pattern (yyyy, MM, dd, HH, mm, ss, ...) or strftime (%Y-%m-%d)
date_format = "yyyy-MM-dd"

# Font family; falls back to the built-in bitmap font when not installed
font_family = "Digital Display"

# Font size in pixels
font_size = 64.0

# Text color as normalized [r, g, b, a]
text_color = [0.745, 0.529, 0.314, 1.0]

# Distance in pixels from the right edge to the end of the text
margin_right = 40

# Distance in pixels from the bottom edge to the text baseline
margin_bottom = 40

# Where processed photos are written
output_directory = "watermarked"
"#
        .to_string()
    }
}

/// Errors that can occur when loading or saving configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read configuration file
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse configuration file
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to write configuration file
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to serialize configuration
    SerializeError { source: toml::ser::Error },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path.display(), source)
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), source)
            }
            ConfigError::WriteError { path, source } => {
                write!(f, "Failed to write config file '{}': {}", path.display(), source)
            }
            ConfigError::SerializeError { source } => {
                write!(f, "Failed to serialize config: {}", source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::WriteError { source, .. } => Some(source),
            ConfigError::SerializeError { source } => Some(source),
        }
    }
}
