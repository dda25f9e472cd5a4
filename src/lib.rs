//! photomark - stamp photos with their capture date
//!
//! This library provides a batch pipeline that:
//! - resolves each photo's capture date from EXIF, falling back to the
//!   file system creation time
//! - draws the formatted date in the bottom-right corner
//! - re-encodes in the source format with EXIF/ICC metadata carried over
//! - runs photos in parallel with Rayon, isolating per-photo failures

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod naming;
pub mod photo;
pub mod process;
pub mod render;
pub mod time;

#[cfg(test)]
mod test_support;

pub use cli::Cli;
pub use codec::{DecodedImage, MetadataEnvelope, OutputFormat};
pub use config::{Config, ConfigError, TextColor, WatermarkConfig};
pub use error::{Error, ErrorKind, Result};
pub use naming::OutputNamer;
pub use photo::{Batch, Outcome, Photo, PhotoId, PhotoStatus, ProcessingResult, SkipReason};
pub use process::{
    BatchReport, BatchStats, BatchSummary, CancellationToken, PipelineCoordinator,
    PipelineOptions, ProgressObserver,
};
pub use render::{WatermarkFont, WatermarkRenderer};
pub use time::{DatePattern, DateResolver, DateSource, MetadataDateResolver, ResolvedDate};
