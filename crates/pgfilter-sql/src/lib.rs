//! # pgfilter-sql
//!
//! Reduces SQL text to a structural fingerprint.
//!
//! Two statements get the same fingerprint when they differ only in literal
//! values:
//!
//! ```
//! use pgfilter_sql::Fingerprinter;
//!
//! let fingerprinter = Fingerprinter::new();
//! let a = fingerprinter.fingerprint("SELECT * FROM orders WHERE id = 1").unwrap();
//! let b = fingerprinter.fingerprint("select *  from orders where id = 42").unwrap();
//! assert_eq!(a, b);
//! ```
//!
//! With [`Fingerprinter::ignore_unix_timestamps`] enabled, runs of 9 to 15
//! digits inside number and identifier tokens are also replaced before
//! parsing, so statements that embed an epoch value in a table name still
//! collide.

pub mod error;
pub mod fingerprint;
pub mod normalize;

pub use error::FingerprintError;
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use normalize::replace_unix_timestamps;
