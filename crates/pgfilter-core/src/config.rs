//! On-disk configuration.
//!
//! The proxy is configured by a single YAML file:
//!
//! ```yaml
//! listen: 0.0.0.0:5433
//! target_server: localhost:5432
//! ignore_unix_timestamps: true
//! allowed_fingerprints:
//!   - 5e1c2a0f3b9d7e41
//! allowed_commands: ["X", "p"]
//! audit:
//!   stdout: true
//! ```
//!
//! Everything except `audit` is reloadable and becomes a [`Policy`].

use crate::error::ConfigError;
use crate::policy::{Policy, PolicySource};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "pgfilterproxy.yaml";

/// The configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address to accept client connections on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Backend Postgres server.
    #[serde(default = "default_target_server")]
    pub target_server: String,

    /// Ignore embedded Unix timestamps when fingerprinting.
    #[serde(default)]
    pub ignore_unix_timestamps: bool,

    /// Fingerprints of allowed queries.
    #[serde(default, deserialize_with = "deserialize_fingerprints")]
    pub allowed_fingerprints: Vec<String>,

    /// Allowed non-query client messages, one character each (e.g. "X").
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    /// Event sink settings. Read once at startup.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            target_server: default_target_server(),
            ignore_unix_timestamps: false,
            allowed_fingerprints: Vec::new(),
            allowed_commands: Vec::new(),
            audit: AuditConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Read and parse a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse a configuration document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Validate the reloadable part of the configuration into a [`Policy`].
    pub fn to_policy(&self) -> Result<Policy, ConfigError> {
        let listen_address = self.listen.trim();
        if listen_address.is_empty() {
            return Err(ConfigError::MissingAddress("listen"));
        }
        let target_address = self.target_server.trim();
        if target_address.is_empty() {
            return Err(ConfigError::MissingAddress("target_server"));
        }

        let allowed_commands = self
            .allowed_commands
            .iter()
            .map(|command| parse_command(command))
            .collect::<Result<HashSet<_>, _>>()?;

        let allowed_fingerprints = self
            .allowed_fingerprints
            .iter()
            .map(|fp| fp.trim().to_ascii_lowercase())
            .filter(|fp| !fp.is_empty())
            .collect();

        Ok(Policy {
            listen_address: listen_address.to_string(),
            target_address: target_address.to_string(),
            allowed_fingerprints,
            allowed_commands,
            ignore_unix_timestamps: self.ignore_unix_timestamps,
        })
    }
}

/// An unquoted all-digit fingerprint is read by YAML as an integer; keep
/// its digits. Anything YAML reads as a float has lost them.
fn deserialize_fingerprints<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Text(String),
        Integer(u64),
        Float(f64),
    }

    Vec::<Entry>::deserialize(deserializer)?
        .into_iter()
        .map(|entry| match entry {
            Entry::Text(text) => Ok(text),
            Entry::Integer(n) => Ok(n.to_string()),
            Entry::Float(f) => Err(de::Error::custom(format!(
                "allowed_fingerprints entry was read as the number {f}; quote it"
            ))),
        })
        .collect()
}

fn parse_command(command: &str) -> Result<u8, ConfigError> {
    match command.as_bytes() {
        [tag] if tag.is_ascii() => Ok(*tag),
        _ => Err(ConfigError::InvalidCommand(command.to_string())),
    }
}

/// Event sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether events are recorded at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Print events to stdout as JSON lines.
    #[serde(default = "default_true")]
    pub stdout: bool,

    /// Append events to this file as JSON lines.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stdout: true,
            file: None,
        }
    }
}

/// Loads policies from a YAML file, re-reading it on every load.
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for FilePolicySource {
    fn load(&self) -> Result<Policy, ConfigError> {
        let policy = ProxyConfig::from_path(&self.path)?.to_policy()?;
        tracing::debug!(
            path = %self.path.display(),
            fingerprints = policy.allowed_fingerprints.len(),
            commands = policy.allowed_commands.len(),
            "Policy loaded"
        );
        Ok(policy)
    }
}

// Default value functions
fn default_listen() -> String {
    "0.0.0.0:5433".to_string()
}

fn default_target_server() -> String {
    "localhost:5432".to_string()
}

fn default_true() -> bool {
    true
}
