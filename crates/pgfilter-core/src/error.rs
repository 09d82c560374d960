//! Error types for the core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An allowed command is not a single ASCII character.
    #[error("invalid command {0:?}: expected a single ASCII character")]
    InvalidCommand(String),

    /// A required address is empty.
    #[error("missing {0} address")]
    MissingAddress(&'static str),
}
