//! Backend address resolution.

use async_trait::async_trait;
use pgfilter_core::PolicyStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ProxyError;

/// Per-connection state visible to resolvers and logs.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Unique id used to correlate log lines and audit events.
    pub id: Uuid,
    /// Address of the client.
    pub client_addr: SocketAddr,
    /// Startup parameters (`user`, `database`, ...) once they are known.
    pub metadata: HashMap<String, String>,
    /// Cancelled when the connection should wind down.
    pub cancel: CancellationToken,
}

impl ConnectionContext {
    pub fn new(client_addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_addr,
            metadata: HashMap::new(),
            cancel,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.metadata.get("user").map(String::as_str)
    }

    pub fn database(&self) -> Option<&str> {
        self.metadata.get("database").map(String::as_str)
    }
}

/// Chooses the backend a new connection is forwarded to.
///
/// Called once per connection, after the startup packet has been read and
/// before anything is sent to a backend.
#[async_trait]
pub trait BackendResolver: Send + Sync {
    async fn resolve(&self, context: &ConnectionContext) -> Result<String, ProxyError>;
}

/// Forwards every connection to the target in the current policy snapshot.
///
/// A reload that changes the target affects new connections only.
pub struct PolicyResolver {
    store: Arc<PolicyStore>,
}

impl PolicyResolver {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackendResolver for PolicyResolver {
    async fn resolve(&self, _context: &ConnectionContext) -> Result<String, ProxyError> {
        let target = self.store.snapshot().target_address.clone();
        if target.is_empty() {
            return Err(ProxyError::ResolveFailed(
                "policy has no target address".to_string(),
            ));
        }
        Ok(target)
    }
}

/// Always forwards to the same address.
pub struct StaticResolver {
    address: String,
}

impl StaticResolver {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl BackendResolver for StaticResolver {
    async fn resolve(&self, _context: &ConnectionContext) -> Result<String, ProxyError> {
        Ok(self.address.clone())
    }
}
