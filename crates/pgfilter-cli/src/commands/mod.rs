//! CLI command implementations.

pub mod check;
pub mod fingerprint;
pub mod serve;
