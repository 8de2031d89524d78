//! Error types for cnwan-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or saving local state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.cnwan/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The settings file did not exist at the expected path.
    #[error("settings not found at {path}; run `cnwan init` first")]
    SettingsNotFound { path: PathBuf },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
