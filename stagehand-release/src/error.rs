//! Error types for stagehand-release.

use std::path::PathBuf;

use thiserror::Error;

use stagehand_core::types::ReleaseId;
use stagehand_transport::TransportError;

/// All errors that can arise from release operations.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// A command or copy on the target failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A local I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walking source tree failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Manifest JSON could not be read or written.
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Checksums of the staged files did not match the manifest.
    #[error("release {release} failed verification:\n{detail}")]
    VerificationFailed { release: ReleaseId, detail: String },

    /// The target-side checksum run failed without naming any file.
    #[error("checksum run for release {release} failed (status {status:?}): {detail}")]
    CheckFailed {
        release: ReleaseId,
        status: Option<i32>,
        detail: String,
    },

    #[error("release {release} does not exist on the target")]
    ReleaseNotFound { release: ReleaseId },

    /// Refused to remove the release `current` points at.
    #[error("release {release} is live and cannot be removed")]
    ReleaseIsLive { release: ReleaseId },
}

/// Convenience constructor for [`ReleaseError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReleaseError {
    ReleaseError::Io {
        path: path.into(),
        source,
    }
}
