//! Error types for stagehand-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from app registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse app config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.stagehand/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The app YAML file did not exist at the expected path.
    #[error("app not registered (no config at {path})")]
    AppNotFound { path: PathBuf },

    /// App names become file and directory names on both sides of a deploy.
    #[error("invalid app name '{name}': use ASCII letters, digits, '-', '_' or '.'")]
    InvalidName { name: String },

    /// The config loaded but cannot be used as-is.
    #[error("invalid config for '{app}': {message}")]
    Invalid { app: String, message: String },
}
