//! Shared fixtures: a scripted backend and a minimal client.

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use pgfilter_audit::AuditLogger;
use pgfilter_core::{Policy, PolicyStore};
use pgfilter_proxy::{
    BackendCodec, BackendMessage, FilterProxy, FrontendCodec, FrontendMessage, ProtocolError,
    ProxyError, StartupMessage, StartupPacket,
};
use pgfilter_sql::Fingerprinter;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

/// A backend that acknowledges startup and answers every query with a
/// `CommandComplete` whose tag is the query text it received.
pub struct MockBackend {
    pub address: SocketAddr,
    received: Arc<Mutex<Vec<FrontendMessage>>>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_backend_connection(socket, log.clone()));
            }
        });

        Self { address, received }
    }

    /// Every message received so far, across all connections.
    pub fn received(&self) -> Vec<FrontendMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                FrontendMessage::Query { text } => Some(text),
                _ => None,
            })
            .collect()
    }
}

async fn serve_backend_connection(socket: TcpStream, log: Arc<Mutex<Vec<FrontendMessage>>>) {
    let (read, write) = socket.into_split();
    let mut input = FramedRead::new(read, FrontendCodec::new());
    let mut output = FramedWrite::new(write, BackendCodec::new());

    while let Some(Ok(message)) = input.next().await {
        log.lock().unwrap().push(message.clone());

        let replies = match &message {
            FrontendMessage::Startup(StartupPacket::Startup(_)) => {
                vec![authentication_ok(), ready_for_query()]
            }
            FrontendMessage::Startup(_) => return,
            FrontendMessage::Query { text } => {
                vec![command_complete(text.as_bytes()), ready_for_query()]
            }
            FrontendMessage::UndecodableQuery { bytes } => {
                vec![command_complete(bytes), ready_for_query()]
            }
            FrontendMessage::Other { tag: b'X', .. } => return,
            FrontendMessage::Other { .. } => continue,
        };

        for reply in replies {
            if output.send(reply).await.is_err() {
                return;
            }
        }
    }
}

fn authentication_ok() -> BackendMessage {
    BackendMessage {
        tag: b'R',
        body: Bytes::from_static(&[0, 0, 0, 0]),
    }
}

fn ready_for_query() -> BackendMessage {
    BackendMessage {
        tag: b'Z',
        body: Bytes::from_static(b"I"),
    }
}

fn command_complete(text: &[u8]) -> BackendMessage {
    let mut body = BytesMut::new();
    body.put_slice(text);
    body.put_u8(0);
    BackendMessage {
        tag: b'C',
        body: body.freeze(),
    }
}

/// A client that speaks just enough of the protocol for the tests.
pub struct TestClient {
    reader: FramedRead<OwnedReadHalf, BackendCodec>,
    writer: FramedWrite<OwnedWriteHalf, FrontendCodec>,
}

impl TestClient {
    /// Connect and complete the startup handshake.
    pub async fn connect(address: SocketAddr) -> Self {
        let stream = TcpStream::connect(address).await.unwrap();
        Self::handshake(stream).await
    }

    /// Connect with extra startup parameters and complete the handshake.
    pub async fn connect_with(address: SocketAddr, parameters: &[(&str, &str)]) -> Self {
        let stream = TcpStream::connect(address).await.unwrap();
        Self::handshake_with(stream, parameters).await
    }

    /// Complete the startup handshake on an open stream.
    pub async fn handshake(stream: TcpStream) -> Self {
        Self::handshake_with(stream, &[]).await
    }

    async fn handshake_with(stream: TcpStream, parameters: &[(&str, &str)]) -> Self {
        let (read, write) = stream.into_split();
        let mut client = Self {
            reader: FramedRead::new(read, BackendCodec::new()),
            writer: FramedWrite::new(write, FrontendCodec::tagged()),
        };

        let mut startup = vec![
            ("user".to_string(), "app".to_string()),
            ("database".to_string(), "orders".to_string()),
        ];
        startup.extend(
            parameters
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        client
            .send(FrontendMessage::Startup(StartupPacket::Startup(
                StartupMessage::new(startup),
            )))
            .await;

        assert_eq!(client.expect_message().await.tag, b'R');
        assert_eq!(client.expect_message().await.tag, b'Z');
        client
    }

    pub async fn send(&mut self, message: FrontendMessage) {
        self.writer.send(message).await.unwrap();
    }

    pub async fn next(&mut self) -> Option<Result<BackendMessage, ProtocolError>> {
        self.reader.next().await
    }

    pub async fn expect_message(&mut self) -> BackendMessage {
        self.next()
            .await
            .expect("connection closed")
            .expect("protocol error")
    }

    /// Run a simple query and return the statement the backend executed.
    pub async fn query(&mut self, sql: &str) -> String {
        self.send(FrontendMessage::Query {
            text: sql.to_string(),
        })
        .await;
        self.executed().await
    }

    /// Read the reply to a query already sent and return the statement the
    /// backend executed.
    pub async fn executed(&mut self) -> String {
        let complete = self.expect_message().await;
        assert_eq!(complete.tag, b'C');
        assert_eq!(self.expect_message().await.tag, b'Z');

        let text = &complete.body[..complete.body.len() - 1];
        String::from_utf8(text.to_vec()).unwrap()
    }

    /// Whether the proxy has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        matches!(self.next().await, None | Some(Err(_)))
    }
}

/// Fingerprints of `queries`, the way the proxy computes them.
pub fn fingerprints(queries: &[&str]) -> Vec<String> {
    let fingerprinter = Fingerprinter::new();
    queries
        .iter()
        .map(|sql| fingerprinter.fingerprint(sql).unwrap().as_str().to_string())
        .collect()
}

pub fn policy(target: SocketAddr, allowed_queries: &[&str], allowed_commands: &[u8]) -> Policy {
    Policy {
        listen_address: "127.0.0.1:0".to_string(),
        target_address: target.to_string(),
        allowed_fingerprints: fingerprints(allowed_queries).into_iter().collect(),
        allowed_commands: allowed_commands.iter().copied().collect(),
        ignore_unix_timestamps: false,
    }
}

pub struct RunningProxy {
    pub proxy: Arc<FilterProxy>,
    pub address: SocketAddr,
    pub serving: JoinHandle<Result<(), ProxyError>>,
}

/// Serve `store` on an ephemeral port.
pub async fn start_proxy(store: Arc<PolicyStore>, audit: AuditLogger) -> RunningProxy {
    serve_proxy(FilterProxy::new(store, audit)).await
}

/// Serve an already configured proxy on an ephemeral port.
pub async fn serve_proxy(proxy: FilterProxy) -> RunningProxy {
    let proxy = Arc::new(proxy);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let serving = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.serve(listener).await }
    });

    RunningProxy {
        proxy,
        address,
        serving,
    }
}

pub fn static_store(policy: Policy) -> Arc<PolicyStore> {
    Arc::new(PolicyStore::load(Arc::new(policy)).unwrap())
}
