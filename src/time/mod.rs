//! Capture-date resolution
//!
//! A photo's date is taken from, in order:
//! - EXIF `DateTimeOriginal`, `DateTimeDigitized`, `DateTime`
//! - the file system creation (birth) time
//!
//! When neither is available the photo has no date and is passed through
//! without a watermark.

pub mod exif;
pub mod pattern;

use crate::error::{Error, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

pub use pattern::DatePattern;

/// Source of the resolved date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// Extracted from the named EXIF tag
    Exif(::exif::Tag),
    /// File system creation time
    FileCreated,
}

/// A photo's capture date and where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    /// The date in the photo's local wall-clock time
    pub timestamp: NaiveDateTime,
    /// Source of the date
    pub source: DateSource,
}

/// Where the pipeline gets capture dates from
pub trait DateResolver: Send + Sync {
    /// `Ok(None)` means the photo has no date and is passed through
    fn resolve(&self, path: &Path) -> Result<Option<ResolvedDate>>;
}

/// Resolves capture dates from embedded metadata with a file system fallback
#[derive(Debug, Clone, Copy)]
pub struct MetadataDateResolver {
    file_time_fallback: bool,
}

impl Default for MetadataDateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataDateResolver {
    pub fn new() -> Self {
        Self {
            file_time_fallback: true,
        }
    }

    /// Only trust EXIF; photos without an EXIF date get no date at all
    pub fn exif_only() -> Self {
        Self {
            file_time_fallback: false,
        }
    }

    pub fn with_file_time_fallback(file_time_fallback: bool) -> Self {
        Self { file_time_fallback }
    }

    /// Resolve the capture date of the file at `path`.
    ///
    /// Returns `Ok(None)` when no date can be found. Only failing to open or
    /// stat the file is an error.
    pub fn resolve(&self, path: &Path) -> Result<Option<ResolvedDate>> {
        let file = File::open(path).map_err(|e| Error::DateResolution {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut reader = BufReader::new(file);

        if let Some((timestamp, tag)) = exif::read_exif_time(&mut reader) {
            debug!(?path, ?tag, %timestamp, "Resolved date from EXIF");
            return Ok(Some(ResolvedDate {
                timestamp,
                source: DateSource::Exif(tag),
            }));
        }

        if !self.file_time_fallback {
            debug!(?path, "No EXIF date, file time fallback disabled");
            return Ok(None);
        }

        let metadata = fs::metadata(path).map_err(|e| Error::DateResolution {
            path: path.to_path_buf(),
            source: e,
        })?;

        match metadata.created() {
            Ok(created) => {
                let timestamp = DateTime::<Local>::from(created).naive_local();
                debug!(?path, %timestamp, "No EXIF date, using file creation time");
                Ok(Some(ResolvedDate {
                    timestamp,
                    source: DateSource::FileCreated,
                }))
            }
            Err(e) => {
                debug!(?path, error = %e, "No EXIF date and no creation time");
                Ok(None)
            }
        }
    }
}

impl DateResolver for MetadataDateResolver {
    fn resolve(&self, path: &Path) -> Result<Option<ResolvedDate>> {
        MetadataDateResolver::resolve(self, path)
    }
}
