//! CLI argument parsing with clap

use crate::config::{Config, TextColor};
use clap::Parser;
use std::path::PathBuf;

/// photomark - stamp photos with their capture date
///
/// Reads each photo's capture date from EXIF (falling back to the file's
/// creation time), draws it in the bottom-right corner and writes a copy
/// in the same format with the original metadata intact.
#[derive(Parser, Debug)]
#[command(name = "photomark")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Photos or folders to process (jpg, jpeg, png, heic)
    #[arg(required_unless_present = "print_sample_config")]
    pub inputs: Vec<PathBuf>,

    /// Path to configuration file (TOML format)
    ///
    /// When specified, settings from the config file are used as defaults.
    /// CLI arguments will override config file settings.
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Output directory for watermarked photos
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Date pattern, e.g. "yyyy-MM-dd" or "%d/%m/%Y"
    #[arg(long)]
    pub date_format: Option<String>,

    /// Font family name
    #[arg(long)]
    pub font: Option<String>,

    /// Font size in pixels
    #[arg(long)]
    pub font_size: Option<f32>,

    /// Text color as normalized "r,g,b" or "r,g,b,a"
    #[arg(long, value_parser = parse_color)]
    pub color: Option<TextColor>,

    /// Pixels from the right edge to the end of the text
    #[arg(long)]
    pub margin_right: Option<u32>,

    /// Pixels from the bottom edge to the text baseline
    #[arg(long)]
    pub margin_bottom: Option<u32>,

    /// Number of threads for parallel processing (0 = auto)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// JPEG quality (1-100)
    #[arg(short = 'q', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Skip inputs that resolve to a file already in the batch
    #[arg(long)]
    pub dedupe: bool,

    /// Add _1, _2, ... instead of overwriting same-named outputs
    #[arg(long)]
    pub unique_names: bool,

    /// Don't copy the source modification time onto outputs
    #[arg(long)]
    pub no_preserve_mtime: bool,

    /// Only use EXIF dates; photos without one are copied unmarked
    #[arg(long)]
    pub exif_only: bool,

    /// Descend into sub-folders of folder inputs
    #[arg(short, long)]
    pub recursive: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output log format as JSON
    #[arg(long)]
    pub json_log: bool,

    /// Print the batch report as JSON instead of the styled summary
    #[arg(long)]
    pub json: bool,

    /// Print a sample configuration file and exit
    #[arg(long)]
    pub print_sample_config: bool,
}

fn parse_color(s: &str) -> Result<TextColor, String> {
    s.parse()
}

impl Cli {
    /// Merge CLI arguments with config from file
    /// CLI arguments take precedence over config file settings
    pub fn merge_with_config(&self, mut config: Config) -> Config {
        let watermark = &mut config.watermark;
        if let Some(ref output) = self.output {
            watermark.output_directory = output.clone();
        }
        if let Some(ref date_format) = self.date_format {
            watermark.date_format = date_format.clone();
        }
        if let Some(ref font) = self.font {
            watermark.font_family = font.clone();
        }
        if let Some(font_size) = self.font_size {
            watermark.font_size = font_size;
        }
        if let Some(color) = self.color {
            watermark.text_color = color;
        }
        if let Some(margin_right) = self.margin_right {
            watermark.margin_right = margin_right;
        }
        if let Some(margin_bottom) = self.margin_bottom {
            watermark.margin_bottom = margin_bottom;
        }

        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(quality) = self.quality {
            config.jpeg_quality = quality;
        }
        if self.dedupe {
            config.deduplicate = true;
        }
        if self.unique_names {
            config.unique_names = true;
        }
        if self.no_preserve_mtime {
            config.preserve_mtime = false;
        }
        if self.exif_only {
            config.file_time_fallback = false;
        }
        if self.recursive {
            config.recursive = true;
        }

        config
    }

    /// Convert CLI arguments to Config (when no config file is used)
    pub fn to_config(&self) -> Config {
        self.merge_with_config(Config::default())
    }
}
