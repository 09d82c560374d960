//! Error types for the fingerprinting crate.

use thiserror::Error;

/// Errors that can occur while fingerprinting a statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    /// The text is not a statement the parser understands.
    #[error("{0}")]
    Parse(String),
}
