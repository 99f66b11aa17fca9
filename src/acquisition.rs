use anyhow::Result;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, span, Level};

use crate::error::CycleError;

pub mod webcam;

/// Matches the `yyyy_MM_dd_HHmmss` stamp embedded in capture file names.
const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H%M%S";
const CAPTURE_PREFIX: &str = "JPEG_";
const CAPTURE_SUFFIX: &str = ".jpg";

/// Handle to a captured image file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageReference {
    #[default]
    Empty,
    File(PathBuf),
}

impl ImageReference {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ImageReference::Empty => None,
            ImageReference::File(p) => Some(p),
        }
    }
}

/// A capture target exposed for another component to write into, addressed
/// as `content://{authority}/{file name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareHandle {
    uri: String,
    target: ImageReference,
}

impl ShareHandle {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn target(&self) -> &ImageReference {
        &self.target
    }

    /// Backing file the capture device writes to.
    pub fn path(&self) -> Option<&Path> {
        self.target.path()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Success,
    Cancelled,
}

/// The camera capability: fills the file behind `handle` with a JPEG photo.
pub trait CaptureDevice {
    fn capture(&mut self, handle: &ShareHandle) -> Result<CaptureOutcome>;
}

/// Creates capture files in a single directory and shares them.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
    authority: String,
}

impl CaptureStore {
    pub fn new(dir: impl Into<PathBuf>, package: &str) -> CaptureStore {
        CaptureStore {
            dir: dir.into(),
            authority: format!("{package}.provider"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a new, uniquely named, empty capture file.
    ///
    /// Names carry a second-resolution timestamp plus a random suffix, so
    /// repeated calls within the same second never collide.
    pub fn create_capture_target(&self) -> std::result::Result<ImageReference, CycleError> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        let prefix = format!("{CAPTURE_PREFIX}{stamp}_");

        let storage_err = |source: std::io::Error| CycleError::Storage {
            dir: self.dir.clone(),
            source,
        };

        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(CAPTURE_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(storage_err)?;
        let (_, path) = file.keep().map_err(|e| storage_err(e.error))?;

        debug!("Created capture target {path:?}");
        Ok(ImageReference::File(path))
    }

    /// Builds the shareable handle for a target created by this store.
    pub fn share(&self, target: &ImageReference) -> std::result::Result<ShareHandle, CycleError> {
        let path = target.path().ok_or_else(|| CycleError::Share {
            path: PathBuf::new(),
            reason: "no capture target",
        })?;

        if path.parent() != Some(self.dir.as_path()) {
            return Err(CycleError::Share {
                path: path.to_path_buf(),
                reason: "outside the capture directory",
            });
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CycleError::Share {
                path: path.to_path_buf(),
                reason: "file name is not valid UTF-8",
            })?;

        Ok(ShareHandle {
            uri: format!("content://{}/{name}", self.authority),
            target: target.clone(),
        })
    }
}

/// Stands in for the camera by copying an existing photo into the target.
pub struct FileCapture {
    source: PathBuf,
}

impl FileCapture {
    pub fn new(source: impl Into<PathBuf>) -> FileCapture {
        FileCapture {
            source: source.into(),
        }
    }
}

impl CaptureDevice for FileCapture {
    fn capture(&mut self, handle: &ShareHandle) -> Result<CaptureOutcome> {
        let span = span!(Level::DEBUG, "file_capture");
        let _guard = span.enter();

        let Some(dest) = handle.path() else {
            return Ok(CaptureOutcome::Cancelled);
        };

        let bytes = std::fs::copy(&self.source, dest)?;
        debug!("Copied {bytes} bytes from {:?} to {}", self.source, handle.uri());

        Ok(CaptureOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_targets_are_distinct_within_one_second() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path(), "faceprobe");

        let first = store.create_capture_target().unwrap();
        let second = store.create_capture_target().unwrap();

        assert_ne!(first, second);
        for target in [&first, &second] {
            let path = target.path().unwrap();
            assert!(path.exists());
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with(CAPTURE_PREFIX));
            assert!(name.ends_with(CAPTURE_SUFFIX));
        }
    }

    #[test]
    fn missing_directory_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path().join("gone"), "faceprobe");

        let err = store.create_capture_target().unwrap_err();
        assert!(matches!(err, CycleError::Storage { .. }));
    }

    #[test]
    fn share_handle_points_at_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path(), "faceprobe");
        let target = store.create_capture_target().unwrap();

        let handle = store.share(&target).unwrap();
        let name = target.path().unwrap().file_name().unwrap().to_str().unwrap();

        assert_eq!(handle.target(), &target);
        assert_eq!(handle.uri(), format!("content://faceprobe.provider/{name}"));
    }

    #[test]
    fn share_rejects_empty_and_foreign_targets() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path(), "faceprobe");

        assert!(matches!(
            store.share(&ImageReference::Empty),
            Err(CycleError::Share { .. })
        ));
        assert!(matches!(
            store.share(&ImageReference::File(other.path().join("x.jpg"))),
            Err(CycleError::Share { .. })
        ));
    }

    #[test]
    fn file_capture_copies_source_into_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"not really a jpeg").unwrap();

        let store = CaptureStore::new(dir.path(), "faceprobe");
        let target = store.create_capture_target().unwrap();
        let handle = store.share(&target).unwrap();

        let outcome = FileCapture::new(&source).capture(&handle).unwrap();

        assert_eq!(outcome, CaptureOutcome::Success);
        assert_eq!(
            std::fs::read(target.path().unwrap()).unwrap(),
            b"not really a jpeg"
        );
    }
}
