//! Error types for photomark

use crate::photo::PhotoId;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for photomark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for photomark
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Failed to read capture date from {path}: {source}")]
    DateResolution {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to compose watermark: {0}")]
    Composition(String),

    #[error("Failed to encode {format}: {message}")]
    Encode { format: String, message: String },

    #[error("Cannot create output directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No photo with id {0} in the batch")]
    PhotoNotFound(PhotoId),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Classification of failures as reported per photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Source could not be read or is not a valid image
    Decode,
    /// Metadata/timestamps could not be read (never fatal for a photo)
    DateResolution,
    /// Drawing surface could not be allocated
    Composition,
    /// Target format unsupported or writer failure
    Encode,
    /// Output directory unusable (fatal for the whole batch)
    Directory,
    /// Cooperative cancellation stopped the photo mid-flight
    Cancelled,
    /// A photo id that is not (or no longer) in the batch
    NotFound,
    /// Anything else (bad state, pool construction, configuration)
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Decode => "decode error",
            ErrorKind::DateResolution => "date resolution error",
            ErrorKind::Composition => "composition error",
            ErrorKind::Encode => "encode error",
            ErrorKind::Directory => "directory error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotFound => "photo not found",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(label)
    }
}

impl Error {
    /// Classify this error into the kind recorded on a failed photo
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode { .. } => ErrorKind::Decode,
            Error::DateResolution { .. } => ErrorKind::DateResolution,
            Error::Composition(_) => ErrorKind::Composition,
            Error::Encode { .. } | Error::Io(_) => ErrorKind::Encode,
            Error::Directory { .. } => ErrorKind::Directory,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::PhotoNotFound(_) => ErrorKind::NotFound,
            Error::InvalidTransition { .. } | Error::ThreadPool(_) | Error::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether this error must abort the whole batch rather than one photo
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Directory | ErrorKind::Internal)
    }

    /// Human-readable message stored on a failed photo
    pub fn classified_message(&self) -> String {
        match self {
            Error::Cancelled => "processing cancelled".to_string(),
            other => format!("{}: {}", other.kind(), other),
        }
    }
}
