//! Photo work items and batches
//!
//! A [`Photo`] moves `Pending -> Processing -> Completed | Failed`. The only
//! backwards move is an explicit retry of a failed photo.

use crate::config::is_supported_path;
use crate::error::{Error, ErrorKind, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Stable identifier of a photo within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PhotoId(Uuid);

impl PhotoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing status of a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Processing => "processing",
            PhotoStatus::Completed => "completed",
            PhotoStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One unit of work
#[derive(Debug, Clone, Serialize)]
pub struct Photo {
    id: PhotoId,
    source_location: PathBuf,
    output_location: Option<PathBuf>,
    status: PhotoStatus,
    progress: f32,
    error: Option<String>,
}

impl Photo {
    pub fn new(source_location: impl Into<PathBuf>) -> Self {
        Self {
            id: PhotoId::new(),
            source_location: source_location.into(),
            output_location: None,
            status: PhotoStatus::Pending,
            progress: 0.0,
            error: None,
        }
    }

    pub fn id(&self) -> PhotoId {
        self.id
    }

    pub fn source_location(&self) -> &Path {
        &self.source_location
    }

    /// Set only once the photo has completed
    pub fn output_location(&self) -> Option<&Path> {
        self.output_location.as_deref()
    }

    pub fn status(&self) -> PhotoStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Set only while the photo is failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn transition(&self, expected: PhotoStatus, to: PhotoStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// `Pending -> Processing`, starting progress from zero
    pub fn start_processing(&mut self) -> Result<()> {
        self.transition(PhotoStatus::Pending, PhotoStatus::Processing)?;
        self.status = PhotoStatus::Processing;
        self.progress = 0.0;
        self.error = None;
        self.output_location = None;
        Ok(())
    }

    /// Raise progress while processing; it never goes backwards
    pub fn set_progress(&mut self, fraction: f32) -> Result<()> {
        self.transition(PhotoStatus::Processing, PhotoStatus::Processing)?;
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.progress = self.progress.max(fraction);
        Ok(())
    }

    /// `Processing -> Completed` with the written output
    pub fn complete(&mut self, output: PathBuf) -> Result<()> {
        self.transition(PhotoStatus::Processing, PhotoStatus::Completed)?;
        self.status = PhotoStatus::Completed;
        self.progress = 1.0;
        self.output_location = Some(output);
        self.error = None;
        Ok(())
    }

    /// `Processing -> Failed` with a human-readable reason
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(PhotoStatus::Processing, PhotoStatus::Failed)?;
        self.status = PhotoStatus::Failed;
        self.progress = 0.0;
        self.output_location = None;
        self.error = Some(message.into());
        Ok(())
    }

    /// Manual retry: `Failed -> Pending`
    pub fn reset_for_retry(&mut self) -> Result<()> {
        self.transition(PhotoStatus::Failed, PhotoStatus::Pending)?;
        self.status = PhotoStatus::Pending;
        self.progress = 0.0;
        self.error = None;
        Ok(())
    }
}

/// Why a photo produced no watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// No capture date; the image was passed through unmarked
    NoDate,
    /// The run was cancelled before the photo started
    Cancelled,
}

/// Per-photo result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "outcome", content = "detail")]
pub enum Outcome {
    Success(PathBuf),
    Skipped(SkipReason),
    Failure(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    pub photo_id: PhotoId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// The photos submitted together for processing
#[derive(Debug, Default)]
pub struct Batch {
    photos: Vec<Photo>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add input files to the batch.
    ///
    /// Files outside the extension allow-list are dropped without error.
    /// With `deduplicate`, a path resolving to a file already in the batch
    /// is dropped too. Returns how many photos were added.
    pub fn accept<I, P>(&mut self, paths: I, deduplicate: bool) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut seen: HashSet<PathBuf> = if deduplicate {
            self.photos
                .iter()
                .map(|p| canonical(p.source_location()))
                .collect()
        } else {
            HashSet::new()
        };

        let mut added = 0;
        for path in paths {
            let path = path.as_ref();
            if !is_supported_path(path) {
                debug!(?path, "Ignoring unsupported file");
                continue;
            }
            if deduplicate && !seen.insert(canonical(path)) {
                debug!(?path, "Ignoring duplicate input");
                continue;
            }
            self.photos.push(Photo::new(path));
            added += 1;
        }
        added
    }

    /// Remove a photo; returns it if it was in the batch
    pub fn remove(&mut self, id: PhotoId) -> Option<Photo> {
        let index = self.photos.iter().position(|p| p.id() == id)?;
        Some(self.photos.remove(index))
    }

    /// Put a failed photo back to pending so the next run picks it up
    pub fn retry(&mut self, id: PhotoId) -> Result<()> {
        match self.photos.iter_mut().find(|p| p.id() == id) {
            Some(photo) => photo.reset_for_retry(),
            None => Err(Error::PhotoNotFound(id)),
        }
    }

    /// Retry every failed photo; returns how many were reset
    pub fn retry_failed(&mut self) -> usize {
        self.photos
            .iter_mut()
            .filter(|p| p.status() == PhotoStatus::Failed)
            .filter_map(|p| p.reset_for_retry().ok())
            .count()
    }

    pub fn clear(&mut self) {
        self.photos.clear();
    }

    pub fn get(&self, id: PhotoId) -> Option<&Photo> {
        self.photos.iter().find(|p| p.id() == id)
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    /// Mutable view for [`crate::PipelineCoordinator::run`]
    pub fn photos_mut(&mut self) -> &mut [Photo] {
        &mut self.photos
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn count(&self, status: PhotoStatus) -> usize {
        self.photos.iter().filter(|p| p.status() == status).count()
    }
}

/// Canonical form used for duplicate detection; unresolvable paths compare as given
fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lifecycle_success() {
        let mut photo = Photo::new("/in/a.jpg");
        assert_eq!(photo.status(), PhotoStatus::Pending);

        photo.start_processing().unwrap();
        photo.set_progress(0.3).unwrap();
        photo.set_progress(0.1).unwrap();
        assert_eq!(photo.progress(), 0.3);

        photo.complete(PathBuf::from("/out/a_1.jpg")).unwrap();
        assert_eq!(photo.status(), PhotoStatus::Completed);
        assert_eq!(photo.progress(), 1.0);
        assert_eq!(photo.output_location(), Some(Path::new("/out/a_1.jpg")));
        assert!(photo.error().is_none());
    }

    #[test]
    fn test_lifecycle_failure_and_retry() {
        let mut photo = Photo::new("/in/a.jpg");
        photo.start_processing().unwrap();
        photo.set_progress(0.5).unwrap();
        photo.fail("decode error: bad").unwrap();

        assert_eq!(photo.status(), PhotoStatus::Failed);
        assert_eq!(photo.progress(), 0.0);
        assert_eq!(photo.error(), Some("decode error: bad"));
        assert!(photo.output_location().is_none());

        photo.reset_for_retry().unwrap();
        assert_eq!(photo.status(), PhotoStatus::Pending);
        assert!(photo.error().is_none());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut photo = Photo::new("/in/a.jpg");
        assert!(photo.complete(PathBuf::from("x")).is_err());
        assert!(photo.fail("x").is_err());
        assert!(photo.set_progress(0.5).is_err());
        assert!(photo.reset_for_retry().is_err());

        photo.start_processing().unwrap();
        assert!(photo.start_processing().is_err());
        photo.complete(PathBuf::from("x")).unwrap();
        // Completed is terminal
        let err = photo.reset_for_retry().unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_accept_filters_extensions() {
        let mut batch = Batch::new();
        let added = batch.accept(["a.jpg", "b.JPEG", "c.png", "d.HEIC", "e.gif", "f"], false);
        assert_eq!(added, 4);
        assert_eq!(batch.len(), 4);
        assert!(batch.photos().iter().all(|p| p.status() == PhotoStatus::Pending));
    }

    #[test]
    fn test_accept_keeps_duplicates_by_default() {
        let mut batch = Batch::new();
        batch.accept(["a.jpg", "a.jpg"], false);
        assert_eq!(batch.len(), 2);
        assert_ne!(batch.photos()[0].id(), batch.photos()[1].id());
    }

    #[test]
    fn test_accept_dedupes_canonical_paths() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();
        let dotted = dir.path().join(".").join("a.jpg");

        let mut batch = Batch::new();
        assert_eq!(batch.accept([&file, &dotted], true), 1);
        assert_eq!(batch.accept([&file], true), 0);
    }

    #[test]
    fn test_remove_get_retry() {
        let mut batch = Batch::new();
        batch.accept(["a.jpg", "b.jpg"], false);
        let id = batch.photos()[0].id();

        assert!(batch.get(id).is_some());
        assert!(batch.retry(id).is_err());

        batch.photos_mut()[0].start_processing().unwrap();
        batch.photos_mut()[0].fail("boom").unwrap();
        assert_eq!(batch.count(PhotoStatus::Failed), 1);
        assert_eq!(batch.retry_failed(), 1);
        assert_eq!(batch.count(PhotoStatus::Pending), 2);

        assert!(batch.remove(id).is_some());
        assert!(batch.get(id).is_none());
        assert!(batch.remove(id).is_none());

        let err = batch.retry(id).unwrap_err();
        assert!(matches!(err, Error::PhotoNotFound(missing) if missing == id));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        batch.clear();
        assert!(batch.is_empty());
    }
}
