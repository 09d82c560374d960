//! Admission policy snapshots and the store that publishes them.
//!
//! A [`Policy`] is never mutated after it is built. Reloading builds a new
//! one from the [`PolicySource`] and swaps it into the [`PolicyStore`] in a
//! single atomic store, so readers see either the old snapshot or the new
//! one and never a mix of both.

use crate::error::ConfigError;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// An immutable admission policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    /// Address the proxy listens on.
    pub listen_address: String,

    /// Backend server new connections are forwarded to.
    pub target_address: String,

    /// Query fingerprints allowed to reach the backend.
    pub allowed_fingerprints: HashSet<String>,

    /// Tags of non-query client messages allowed to reach the backend.
    pub allowed_commands: HashSet<u8>,

    /// Treat runs of 9-15 digits as literals when fingerprinting.
    pub ignore_unix_timestamps: bool,
}

impl Policy {
    /// Check whether a query fingerprint is allow-listed.
    pub fn allows_fingerprint(&self, fingerprint: &str) -> bool {
        self.allowed_fingerprints.contains(fingerprint)
    }

    /// Check whether a client message tag is allow-listed.
    pub fn allows_command(&self, tag: u8) -> bool {
        self.allowed_commands.contains(&tag)
    }
}

/// Something that can produce a fresh [`Policy`].
pub trait PolicySource: Send + Sync {
    /// Load the current policy.
    fn load(&self) -> Result<Policy, ConfigError>;
}

/// A fixed policy is its own source; reloading republishes it unchanged.
impl PolicySource for Policy {
    fn load(&self) -> Result<Policy, ConfigError> {
        Ok(self.clone())
    }
}

/// Holds the policy currently in force.
pub struct PolicyStore {
    current: ArcSwap<Policy>,
    generation: AtomicU64,
    source: Arc<dyn PolicySource>,
}

impl PolicyStore {
    /// Create a store from the initial snapshot of `source`.
    pub fn load(source: Arc<dyn PolicySource>) -> Result<Self, ConfigError> {
        let initial = source.load()?;
        Ok(Self::new(initial, source))
    }

    /// Create a store around a policy that is already built. `source` is
    /// only consulted on [`reload`](Self::reload).
    pub fn new(initial: Policy, source: Arc<dyn PolicySource>) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
            source,
        }
    }

    /// The snapshot in force right now.
    ///
    /// Callers keep the returned `Arc` for as long as they need a consistent
    /// view; a concurrent reload does not affect it.
    pub fn snapshot(&self) -> Arc<Policy> {
        self.current.load_full()
    }

    /// Number of successful reloads since the store was created.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Load a new snapshot from the source and publish it.
    ///
    /// On failure the previous snapshot stays in force.
    pub fn reload(&self) -> Result<Arc<Policy>, ConfigError> {
        let policy = Arc::new(self.source.load()?);
        self.current.store(policy.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(policy)
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("current", &*self.current.load_full())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
