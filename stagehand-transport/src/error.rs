//! Error types for stagehand-transport.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while talking to a deploy target.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Local I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The wrapper program (or `sh`) could not be started at all.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("{context} failed ({}): {stderr}", exit_label(.status))]
    CommandFailed {
        context: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A wrapper template references a value the target config does not set.
    #[error("wrapper template uses {{{placeholder}}} but the target has no {placeholder} configured")]
    MissingPlaceholder { placeholder: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit {code}"),
        None => "killed by signal".to_string(),
    }
}

/// Convenience constructor for [`TransportError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TransportError {
    TransportError::Io {
        path: path.into(),
        source,
    }
}
