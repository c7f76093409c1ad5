//! Error types for stagehand-deploy.

use std::path::PathBuf;

use thiserror::Error;

use stagehand_core::types::{AppName, ReleaseId};

use crate::machine::Phase;

/// Error surface for environment resolution, supervision and the deploy pipeline.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry error: {0}")]
    Registry(#[from] stagehand_core::RegistryError),

    #[error("transport error: {0}")]
    Transport(#[from] stagehand_transport::TransportError),

    #[error("release error: {0}")]
    Release(#[from] stagehand_release::ReleaseError),

    #[error("render error: {0}")]
    Render(#[from] stagehand_renderer::RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The runtime environment could not be built on the target.
    #[error("environment resolution failed: {0}")]
    Resolve(String),

    #[error("process supervisor error: {0}")]
    Supervisor(String),

    #[error("health check failed for {url} after {attempts} attempt(s): {last}")]
    HealthCheckFailed {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("invalid deployment transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    /// Another deploy of the same app holds the lock.
    #[error("app '{app}' is locked by pid {holder} (lock file {path})")]
    Locked {
        app: AppName,
        holder: String,
        path: PathBuf,
    },

    #[error("app '{app}' has never been deployed")]
    NothingDeployed { app: AppName },

    #[error("no release older than {current} to roll back to")]
    NoPreviousRelease { current: ReleaseId },

    #[error("deployment record not found: {path}")]
    RecordNotFound { path: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeployError {
    DeployError::Io {
        path: path.into(),
        source,
    }
}
