use std::path::PathBuf;
use thiserror::Error;

use crate::detection::DetectionError;

/// Everything that can end a capture cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Permission Denied")]
    PermissionDenied,

    #[error("could not create capture file in {}: {source}", dir.display())]
    Storage {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot share {}: {reason}", path.display())]
    Share { path: PathBuf, reason: &'static str },

    #[error("camera capture failed: {0:#}")]
    Capture(anyhow::Error),

    #[error("Could not read captured image")]
    Decode,

    #[error(transparent)]
    Detection(#[from] DetectionError),
}

pub type Result<T> = std::result::Result<T, CycleError>;
