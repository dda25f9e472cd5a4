//! Output file naming and atomic writes
//!
//! Outputs are named `{stem}_{yyyyMMdd_HHmmss}.{ext}` after the processing
//! time. Two sources with the same stem finished in the same second map to
//! the same name; unless unique names are enabled the later one wins.

use crate::codec::OutputFormat;
use crate::config::is_supported_extension;
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, trace, warn};

/// Timestamp layout embedded in output names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extension used when the source's is not one we write
const DEFAULT_EXTENSION: &str = "jpg";

/// Upper bound on `_N` suffixes tried per name
const MAX_SUFFIX: u32 = 10000;

/// Derives output paths inside the output directory
#[derive(Debug)]
pub struct OutputNamer {
    output_dir: PathBuf,
    unique: bool,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl OutputNamer {
    /// `unique` appends `_1`, `_2`, ... instead of reusing a taken name
    pub fn new(output_dir: impl Into<PathBuf>, unique: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            unique,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the output directory (and parents) if missing
    pub fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir).map_err(|e| Error::Directory {
            path: self.output_dir.clone(),
            source: e,
        })?;
        if !self.output_dir.is_dir() {
            return Err(Error::Directory {
                path: self.output_dir.clone(),
                source: io::Error::other("not a directory"),
            });
        }
        Ok(())
    }

    /// File name for `source` processed at `now`
    pub fn file_name(source: &Path, now: &NaiveDateTime) -> Result<String> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no file name in {}", source.display()),
                ))
            })?;

        // Keep the source's spelling (jpeg stays jpeg) unless the output is
        // written in another format
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| is_supported_extension(e))
            .map(str::to_lowercase)
            .filter(|e| {
                let format = OutputFormat::from_extension(e);
                format.written_as() == format
            })
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

        Ok(format!("{}_{}.{}", stem, now.format(TIMESTAMP_FORMAT), extension))
    }

    /// Full output path for `source` processed at `now`
    pub fn output_path(&self, source: &Path, now: &NaiveDateTime) -> Result<PathBuf> {
        let path = self.output_dir.join(Self::file_name(source, now)?);
        if !self.unique {
            return Ok(path);
        }
        self.reserve_unique(path)
    }

    /// Hand out a name nobody in this run holds and that is free on disk
    fn reserve_unique(&self, path: PathBuf) -> Result<PathBuf> {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        if !path.exists() && !reserved.contains(&path) {
            reserved.insert(path.clone());
            return Ok(path);
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        for i in 1..MAX_SUFFIX {
            let candidate = self.output_dir.join(format!("{}_{}{}", stem, i, extension));
            if !candidate.exists() && !reserved.contains(&candidate) {
                debug!(taken = %path.display(), chosen = %candidate.display(), "Output name taken, adding suffix");
                reserved.insert(candidate.clone());
                return Ok(candidate);
            }
        }

        Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("could not find a free name for {}", path.display()),
        )))
    }

    /// Write `bytes` to a hidden temporary file in the output directory.
    ///
    /// Nothing is visible at the final path until [`StagedOutput::commit`];
    /// dropping the staged file removes it.
    pub fn stage(&self, bytes: &[u8]) -> Result<StagedOutput> {
        let mut file = Builder::new()
            .prefix(".photomark-")
            .suffix(".tmp")
            .tempfile_in(&self.output_dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        trace!(path = %file.path().display(), len = bytes.len(), "Staged output");
        Ok(StagedOutput {
            file,
            no_clobber: self.unique,
        })
    }
}

/// Encoded output waiting for its final name
#[derive(Debug)]
pub struct StagedOutput {
    file: NamedTempFile,
    no_clobber: bool,
}

impl StagedOutput {
    /// Atomically move the staged file to `dest`
    pub fn commit(self, dest: &Path) -> Result<()> {
        let result = if self.no_clobber {
            self.file.persist_noclobber(dest)
        } else {
            self.file.persist(dest)
        };
        result.map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// Copy the source's modification time onto the output.
///
/// Returns whether the time was copied; failures are logged, never fatal.
pub fn preserve_mtime(source: &Path, dest: &Path) -> bool {
    let mtime = match fs::metadata(source).and_then(|m| m.modified()) {
        Ok(mtime) => mtime,
        Err(e) => {
            debug!(source = %source.display(), error = %e, "No modification time to preserve");
            return false;
        }
    };
    match filetime::set_file_mtime(dest, filetime::FileTime::from_system_time(mtime)) {
        Ok(()) => true,
        Err(e) => {
            warn!(dest = %dest.display(), error = %e, "Failed to preserve modification time");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_file_name() {
        let now = at("2024-03-09 07:05:01");
        assert_eq!(
            OutputNamer::file_name(Path::new("/in/IMG_001.jpg"), &now).unwrap(),
            "IMG_001_20240309_070501.jpg"
        );
        assert_eq!(
            OutputNamer::file_name(Path::new("shot.PNG"), &now).unwrap(),
            "shot_20240309_070501.png"
        );
        assert_eq!(
            OutputNamer::file_name(Path::new("IMG_7.HEIC"), &now).unwrap(),
            "IMG_7_20240309_070501.jpg"
        );
        assert_eq!(
            OutputNamer::file_name(Path::new("old.jpeg"), &now).unwrap(),
            "old_20240309_070501.jpeg"
        );
        assert_eq!(
            OutputNamer::file_name(Path::new("scan.tiff"), &now).unwrap(),
            "scan_20240309_070501.jpg"
        );
        assert_eq!(
            OutputNamer::file_name(Path::new("README"), &now).unwrap(),
            "README_20240309_070501.jpg"
        );
    }

    #[test]
    fn test_same_second_collides_by_default() {
        let namer = OutputNamer::new("/out", false);
        let now = at("2024-03-09 07:05:01");

        let a = namer.output_path(Path::new("/a/IMG_1.jpg"), &now).unwrap();
        let b = namer.output_path(Path::new("/b/IMG_1.jpg"), &now).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Path::new("/out/IMG_1_20240309_070501.jpg"));
    }

    #[test]
    fn test_unique_names_add_suffix() {
        let dir = tempdir().unwrap();
        let namer = OutputNamer::new(dir.path(), true);
        let now = at("2024-03-09 07:05:01");

        fs::write(dir.path().join("IMG_1_20240309_070501.jpg"), b"taken").unwrap();

        let a = namer.output_path(Path::new("/a/IMG_1.jpg"), &now).unwrap();
        let b = namer.output_path(Path::new("/b/IMG_1.jpg"), &now).unwrap();
        assert_eq!(a.file_name().unwrap(), "IMG_1_20240309_070501_1.jpg");
        assert_eq!(b.file_name().unwrap(), "IMG_1_20240309_070501_2.jpg");
    }

    #[test]
    fn test_ensure_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        OutputNamer::new(&nested, false).ensure_directory().unwrap();
        assert!(nested.is_dir());

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        let err = OutputNamer::new(file.join("sub"), false)
            .ensure_directory()
            .unwrap_err();
        assert!(matches!(err, Error::Directory { .. }));
    }

    #[test]
    fn test_stage_and_commit() {
        let dir = tempdir().unwrap();
        let namer = OutputNamer::new(dir.path(), false);
        let dest = dir.path().join("out.jpg");

        let staged = namer.stage(b"pixels").unwrap();
        assert!(!dest.exists());
        staged.commit(&dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"pixels");

        // Only the committed file remains
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = tempdir().unwrap();
        let namer = OutputNamer::new(dir.path(), false);
        drop(namer.stage(b"pixels").unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_preserve_mtime() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.jpg");
        let dest = dir.path().join("dst.jpg");
        fs::write(&source, b"a").unwrap();
        fs::write(&dest, b"b").unwrap();
        let old = filetime::FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&source, old).unwrap();

        assert!(preserve_mtime(&source, &dest));
        let copied = filetime::FileTime::from_last_modification_time(&fs::metadata(&dest).unwrap());
        assert_eq!(copied, old);

        // Missing destination is reported, not a panic
        assert!(!preserve_mtime(&source, &dir.path().join("gone.jpg")));
        assert!(!preserve_mtime(&dir.path().join("gone.jpg"), &dest));
    }
}
