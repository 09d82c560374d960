//! # pgfilter-core
//!
//! Types shared across the pgfilter crates:
//!
//! - [`Policy`]: the immutable admission policy snapshot
//! - [`PolicyStore`]: the atomically swapped handle connections read from
//! - [`PolicySource`]: where snapshots come from (the YAML file in production)
//! - [`ProxyConfig`]: the on-disk configuration format

pub mod config;
pub mod error;
pub mod policy;
pub mod sanitize;

pub use config::{AuditConfig, FilePolicySource, ProxyConfig, DEFAULT_CONFIG_PATH};
pub use error::ConfigError;
pub use policy::{Policy, PolicySource, PolicyStore};
pub use sanitize::single_line;
