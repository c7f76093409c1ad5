//! Error types for stagehand-renderer.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A template failed to parse or to render against the supervisor context.
    #[error("template {template}: {source}")]
    Template {
        template: String,
        #[source]
        source: tera::Error,
    },

    /// Embedded and user templates are registered together; a broken override
    /// fails the whole set.
    #[error("failed to load templates: {0}")]
    Load(#[from] tera::Error),

    /// `process.command` is empty, so there is nothing to launch.
    #[error("app '{app}' has no process command to render")]
    EmptyCommand { app: String },

    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}
