//! One client connection relayed to one backend connection.
//!
//! A pipe moves through four phases:
//!
//! 1. **Connecting**: read the client's startup packet, answering encryption
//!    requests with `N`, then resolve and dial the backend. Cancellation
//!    ends the connection at any await in this phase.
//! 2. **Relaying**: two halves run concurrently. Client messages are decoded,
//!    judged by the [`MessageHandler`] and re-encoded toward the backend.
//!    Backend bytes are copied to the client untouched.
//! 3. **Closing**: whichever half finishes first cancels the other, then both
//!    write sides are shut down.
//! 4. **Closed**: the first error, if any, is returned to the caller.

use futures::{SinkExt, StreamExt};
use pgfilter_audit::AuditLogger;
use pgfilter_core::PolicyStore;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::FrontendCodec;
use crate::error::{ProtocolError, ProxyError};
use crate::handler::{MessageHandler, Rejection, Verdict};
use crate::message::{ENCRYPTION_REFUSED, FrontendMessage, StartupPacket};
use crate::resolver::{BackendResolver, ConnectionContext};

type ClientReader = FramedRead<OwnedReadHalf, FrontendCodec>;
type BackendWriter = FramedWrite<OwnedWriteHalf, FrontendCodec>;

/// Relays a single client connection.
pub struct ConnectionPipe {
    context: ConnectionContext,
    store: Arc<PolicyStore>,
    handler: Arc<dyn MessageHandler>,
    resolver: Arc<dyn BackendResolver>,
    audit: Arc<AuditLogger>,
}

impl ConnectionPipe {
    pub fn new(
        context: ConnectionContext,
        store: Arc<PolicyStore>,
        handler: Arc<dyn MessageHandler>,
        resolver: Arc<dyn BackendResolver>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            context,
            store,
            handler,
            resolver,
            audit,
        }
    }

    pub fn id(&self) -> Uuid {
        self.context.id
    }

    /// Run the connection to completion.
    ///
    /// A client that disconnects between messages is a clean close and
    /// returns `Ok`.
    pub async fn run(mut self, client: TcpStream) -> Result<(), ProxyError> {
        client.set_nodelay(true)?;
        let (client_read, mut client_write) = client.into_split();
        let mut client_in = FramedRead::new(client_read, FrontendCodec::new());

        let Some(startup) = self.read_startup(&mut client_in, &mut client_write).await? else {
            return Ok(());
        };

        if let StartupPacket::Startup(message) = &startup {
            self.context.metadata.extend(message.parameters.iter().cloned());
        }

        let address = tokio::select! {
            biased;
            _ = self.context.cancel.cancelled() => {
                tracing::debug!(conn = %self.context.id, "Cancelled while resolving backend");
                return Ok(());
            }
            address = self.resolver.resolve(&self.context) => address?,
        };
        tracing::debug!(
            conn = %self.context.id,
            user = ?self.context.user(),
            database = ?self.context.database(),
            backend = %address,
            "Connecting to backend"
        );

        let backend = tokio::select! {
            biased;
            _ = self.context.cancel.cancelled() => {
                tracing::debug!(conn = %self.context.id, "Cancelled while connecting to backend");
                return Ok(());
            }
            connected = TcpStream::connect(&address) => {
                connected.map_err(|source| ProxyError::UpstreamConnectionFailed {
                    address: address.clone(),
                    source,
                })?
            }
        };
        backend.set_nodelay(true)?;
        let (backend_read, backend_write) = backend.into_split();
        let mut backend_out = FramedWrite::new(backend_write, FrontendCodec::tagged());

        backend_out.send(FrontendMessage::Startup(startup)).await?;

        let cancel = self.context.cancel.clone();
        let upstream = async {
            let result = self.relay_client(&mut client_in, &mut backend_out).await;
            cancel.cancel();
            result
        };
        let downstream = async {
            let result = relay_backend(backend_read, &mut client_write, &cancel).await;
            cancel.cancel();
            result
        };
        let (upstream, downstream) = tokio::join!(upstream, downstream);

        // Best effort: the peer may already be gone.
        let _ = backend_out.get_mut().shutdown().await;
        let _ = client_write.shutdown().await;

        upstream.and(downstream)
    }

    /// Read packets until one that is not an encryption request arrives.
    ///
    /// Returns `None` if the client goes away or shutdown begins first.
    async fn read_startup(
        &self,
        client_in: &mut ClientReader,
        client_out: &mut OwnedWriteHalf,
    ) -> Result<Option<StartupPacket>, ProxyError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.context.cancel.cancelled() => return Ok(None),
                next = client_in.next() => next,
            };

            match next {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(FrontendMessage::Startup(packet))) if packet.is_encryption_request() => {
                    tracing::debug!(conn = %self.context.id, "Refusing transport encryption");
                    client_out.write_all(&[ENCRYPTION_REFUSED]).await?;
                }
                Some(Ok(FrontendMessage::Startup(packet))) => return Ok(Some(packet)),
                Some(Ok(_)) => return Err(ProtocolError::Malformed("startup").into()),
            }
        }
    }

    /// Client to backend. Each message is judged against the snapshot in
    /// force when it arrived; a message already being handled is finished
    /// even if shutdown begins meanwhile.
    async fn relay_client(
        &self,
        client_in: &mut ClientReader,
        backend_out: &mut BackendWriter,
    ) -> Result<(), ProxyError> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.context.cancel.cancelled() => return Ok(()),
                next = client_in.next() => match next {
                    Some(message) => message?,
                    None => return Ok(()),
                },
            };

            let policy = self.store.snapshot();
            match self.handler.handle(message, &policy) {
                Verdict::Forward(message) => backend_out.send(message).await?,
                Verdict::Rewrite { message, rejection } => {
                    self.report(&rejection).await;
                    backend_out.send(message).await?;
                }
                Verdict::Terminate(rejection) => {
                    self.report(&rejection).await;
                    return Err(match rejection {
                        Rejection::CommandNotAllowed { tag } => ProxyError::CommandNotAllowed(tag),
                        other => ProxyError::Terminated(other.reason()),
                    });
                }
            }
        }
    }

    async fn report(&self, rejection: &Rejection) {
        let conn = self.context.id.to_string();
        let result = match rejection {
            Rejection::CommandNotAllowed { tag } => {
                tracing::warn!(conn = %conn, command = %(*tag as char), "Disallowed client command");
                self.audit.log_command_rejected(&conn, *tag).await
            }
            _ => {
                let reason = rejection.reason();
                let sql = rejection.sql().unwrap_or_default();
                let fingerprint = rejection.fingerprint().map(|f| f.as_str());
                tracing::warn!(
                    conn = %conn,
                    fingerprint = ?fingerprint,
                    reason = %pgfilter_core::single_line(&reason),
                    sql = %pgfilter_core::single_line(sql),
                    "Query rejected"
                );
                self.audit
                    .log_query_rejected(&conn, fingerprint, sql, &reason)
                    .await
            }
        };

        if let Err(e) = result {
            tracing::warn!(conn = %conn, error = %e, "Failed to write audit event");
        }
    }
}

/// Backend to client. Bytes are copied verbatim.
async fn relay_backend(
    mut backend: OwnedReadHalf,
    client: &mut OwnedWriteHalf,
    cancel: &CancellationToken,
) -> Result<(), ProxyError> {
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        copied = tokio::io::copy(&mut backend, client) => {
            copied?;
            Ok(())
        }
    }
}
