//! Main proxy server implementation.
//!
//! Accepts client connections, runs a [`ConnectionPipe`] for each one, and
//! coordinates policy reloads and graceful shutdown:
//! - every connection reads the policy snapshot in force when each message
//!   arrives
//! - shutdown stops accepting, releases the listener, cancels every
//!   connection, and waits until all of them have finished closing

use pgfilter_audit::AuditLogger;
use pgfilter_core::{ConfigError, Policy, PolicyStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::ProxyError;
use crate::handler::{AdmissionController, MessageHandler};
use crate::pipe::ConnectionPipe;
use crate::resolver::{BackendResolver, ConnectionContext, PolicyResolver};

/// Pause after an accept error that is likely to clear up on its own.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The filtering proxy server.
pub struct FilterProxy {
    store: Arc<PolicyStore>,
    handler: Arc<dyn MessageHandler>,
    resolver: Arc<dyn BackendResolver>,
    audit: Arc<AuditLogger>,
    /// Listen address at startup; reloads cannot move the listener.
    listen_address: String,
    shutdown: CancellationToken,
    accept_loops: TaskTracker,
    connections: TaskTracker,
}

impl FilterProxy {
    /// Create a proxy using the default admission controller and forwarding
    /// to the policy's target address.
    pub fn new(store: Arc<PolicyStore>, audit: AuditLogger) -> Self {
        let listen_address = store.snapshot().listen_address.clone();
        Self {
            resolver: Arc::new(PolicyResolver::new(store.clone())),
            handler: Arc::new(AdmissionController::new()),
            store,
            audit: Arc::new(audit),
            listen_address,
            shutdown: CancellationToken::new(),
            accept_loops: TaskTracker::new(),
            connections: TaskTracker::new(),
        }
    }

    /// Replace the message handler.
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replace the backend resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn BackendResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// The policy snapshot in force right now.
    pub fn policy(&self) -> Arc<Policy> {
        self.store.snapshot()
    }

    /// Number of connections that have not finished closing.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Bind the listen address from the initial policy.
    pub async fn bind(&self) -> Result<TcpListener, ProxyError> {
        TcpListener::bind(&self.listen_address)
            .await
            .map_err(|source| ProxyError::BindFailed {
                address: self.listen_address.clone(),
                source,
            })
    }

    /// Bind and serve until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    ///
    /// The listener is dropped before this returns.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ProxyError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        tracing::info!(
            address = ?listener.local_addr().ok(),
            target = %self.store.snapshot().target_address,
            "Proxy server listening"
        );

        self.accept_loops.track_future(self.accept_loop(listener)).await
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<(), ProxyError> {
        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Accept loop stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) if is_transient_accept_error(&e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                    Err(e) => return Err(ProxyError::AcceptFailed(e)),
                },
            };

            self.spawn_connection(socket, peer);
        }
    }

    fn spawn_connection(&self, socket: TcpStream, peer: SocketAddr) {
        let context = ConnectionContext::new(peer, self.shutdown.child_token());
        let pipe = ConnectionPipe::new(
            context,
            self.store.clone(),
            self.handler.clone(),
            self.resolver.clone(),
            self.audit.clone(),
        );
        let audit = self.audit.clone();

        tracing::debug!(conn = %pipe.id(), peer = %peer, "New connection");

        self.connections.spawn(async move {
            let id = pipe.id();
            match pipe.run(socket).await {
                Ok(()) => tracing::debug!(conn = %id, peer = %peer, "Connection closed"),
                Err(e) => {
                    tracing::error!(conn = %id, peer = %peer, error = %e, "Connection error");
                    if let Err(audit_err) = audit
                        .log_connection_error(&id.to_string(), &peer.to_string(), &e.to_string())
                        .await
                    {
                        tracing::warn!(conn = %id, error = %audit_err, "Failed to write audit event");
                    }
                }
            }
        });
    }

    /// Load a new policy snapshot and publish it.
    ///
    /// On failure the previous snapshot stays in force and the error is
    /// returned after being logged.
    pub async fn reload_policy(&self) -> Result<(), ConfigError> {
        match self.store.reload() {
            Ok(policy) => {
                let generation = self.store.generation();
                tracing::info!(
                    generation,
                    fingerprints = policy.allowed_fingerprints.len(),
                    commands = policy.allowed_commands.len(),
                    target = %policy.target_address,
                    "Policy reloaded"
                );
                if policy.listen_address != self.listen_address {
                    tracing::warn!(
                        current = %self.listen_address,
                        configured = %policy.listen_address,
                        "Listen address changes take effect after a restart"
                    );
                }
                if let Err(e) = self.audit.log_policy_reloaded(generation).await {
                    tracing::warn!(error = %e, "Failed to write audit event");
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Policy reload failed, keeping previous policy");
                if let Err(audit_err) = self.audit.log_policy_reload_failed(&e.to_string()).await {
                    tracing::warn!(error = %audit_err, "Failed to write audit event");
                }
                Err(e)
            }
        }
    }

    /// Stop accepting, cancel every connection, and wait for all of them to
    /// close.
    ///
    /// Connections finish the message they are handling before closing.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        tracing::info!(
            active_connections = self.connections.len(),
            "Shutting down proxy"
        );

        self.shutdown.cancel();
        self.accept_loops.close();
        self.accept_loops.wait().await;

        self.connections.close();
        self.connections.wait().await;

        tracing::info!("Proxy stopped");
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    ) || matches!(e.raw_os_error(), Some(23 | 24))
}
