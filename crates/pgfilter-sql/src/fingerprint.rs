//! Statement fingerprinting.

use crate::error::FingerprintError;
use crate::normalize::{LiteralMasker, replace_unix_timestamps};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlparser::ast::VisitMut;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Tokenizer;
use std::fmt;

/// Number of digest bytes kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 8;

/// The structural identity of a statement: 16 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes fingerprints for Postgres statements.
pub struct Fingerprinter {
    dialect: PostgreSqlDialect,
    ignore_unix_timestamps: bool,
}

impl Clone for Fingerprinter {
    fn clone(&self) -> Self {
        Self {
            dialect: PostgreSqlDialect {},
            ignore_unix_timestamps: self.ignore_unix_timestamps,
        }
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprinter {
    /// Create a fingerprinter with timestamp normalization disabled.
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
            ignore_unix_timestamps: false,
        }
    }

    /// Treat runs of 9 to 15 digits as literals.
    pub fn ignore_unix_timestamps(mut self, enabled: bool) -> Self {
        self.ignore_unix_timestamps = enabled;
        self
    }

    /// Render `sql` in canonical form: parsed, literals masked, one line.
    ///
    /// Multiple statements are joined with `"; "`. Timestamp normalization
    /// rewrites tokens, never the text, so it cannot move a token boundary.
    pub fn canonicalize(&self, sql: &str) -> Result<String, FingerprintError> {
        let mut tokens = Tokenizer::new(&self.dialect, sql)
            .tokenize()
            .map_err(|e| FingerprintError::Parse(ParserError::from(e).to_string()))?;
        if self.ignore_unix_timestamps {
            replace_unix_timestamps(&mut tokens);
        }

        let mut statements = Parser::new(&self.dialect)
            .with_tokens(tokens)
            .parse_statements()
            .map_err(|e| FingerprintError::Parse(e.to_string()))?;

        let mut masker = LiteralMasker;
        let canonical: Vec<String> = statements
            .iter_mut()
            .map(|stmt| {
                let _ = stmt.visit(&mut masker);
                stmt.to_string()
            })
            .collect();

        Ok(canonical.join("; "))
    }

    /// Compute the fingerprint of `sql`.
    pub fn fingerprint(&self, sql: &str) -> Result<Fingerprint, FingerprintError> {
        let canonical = self.canonicalize(sql)?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(Fingerprint(hex::encode(&digest[..FINGERPRINT_BYTES])))
    }
}
