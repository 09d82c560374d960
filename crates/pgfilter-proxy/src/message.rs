//! Postgres wire protocol messages.
//!
//! Only the client direction is decoded. Backend traffic is relayed as raw
//! bytes; [`BackendMessage`] exists for tools and tests that need to look at
//! it.
//!
//! Framing (protocol v3):
//! - startup family: `Int32 length` (including itself) + `Int32 code` + body
//! - everything else: `Byte1 tag` + `Int32 length` (including itself) + body

use bytes::Bytes;

/// Protocol version 3.0.
pub const PROTOCOL_VERSION_3: i32 = 0x0003_0000;

/// SSLRequest code.
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679;

/// GSSENCRequest code.
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680;

/// CancelRequest code.
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678;

/// Single-byte answer refusing SSL or GSS encryption.
pub const ENCRYPTION_REFUSED: u8 = b'N';

/// Frontend message tags.
pub mod tags {
    pub const BIND: u8 = b'B';
    pub const CLOSE: u8 = b'C';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_FAIL: u8 = b'f';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const FLUSH: u8 = b'H';
    pub const FUNCTION_CALL: u8 = b'F';
    pub const PARSE: u8 = b'P';
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// A regular startup message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub protocol_version: i32,
    /// Parameters in the order the client sent them.
    pub parameters: Vec<(String, String)>,
}

impl StartupMessage {
    pub fn new(parameters: Vec<(String, String)>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_3,
            parameters,
        }
    }

    /// Look up a startup parameter such as `user` or `database`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// The untagged packets a client may open a connection with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupPacket {
    SslRequest,
    GssEncRequest,
    Cancel { process_id: i32, secret_key: i32 },
    Startup(StartupMessage),
}

impl StartupPacket {
    /// Whether the client is asking to negotiate transport encryption.
    ///
    /// Another startup packet always follows an encryption request.
    pub fn is_encryption_request(&self) -> bool {
        matches!(self, Self::SslRequest | Self::GssEncRequest)
    }
}

/// A message sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Untagged connection opener.
    Startup(StartupPacket),
    /// Simple query (`Q`).
    Query { text: String },
    /// Simple query whose text is not valid UTF-8, without its terminator.
    UndecodableQuery { bytes: Bytes },
    /// Any other tagged message, kept as raw bytes.
    Other { tag: u8, body: Bytes },
}

impl FrontendMessage {
    /// The tag byte, or `None` for the untagged startup family.
    pub fn tag(&self) -> Option<u8> {
        match self {
            Self::Startup(_) => None,
            Self::Query { .. } | Self::UndecodableQuery { .. } => Some(tags::QUERY),
            Self::Other { tag, .. } => Some(*tag),
        }
    }
}

/// A message sent by the backend. Never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMessage {
    pub tag: u8,
    pub body: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes() {
        assert_eq!(SSL_REQUEST_CODE, 80877103);
        assert_eq!(GSSENC_REQUEST_CODE, 80877104);
        assert_eq!(CANCEL_REQUEST_CODE, 80877102);
        assert_eq!(PROTOCOL_VERSION_3, 196608);
    }

    #[test]
    fn test_startup_parameter_lookup() {
        let startup = StartupMessage::new(vec![
            ("user".to_string(), "app".to_string()),
            ("database".to_string(), "orders".to_string()),
        ]);
        assert_eq!(startup.parameter("database"), Some("orders"));
        assert_eq!(startup.parameter("application_name"), None);
    }

    #[test]
    fn test_tags() {
        assert_eq!(
            FrontendMessage::Query {
                text: "SELECT 1".to_string()
            }
            .tag(),
            Some(b'Q')
        );
        assert_eq!(
            FrontendMessage::Startup(StartupPacket::SslRequest).tag(),
            None
        );
    }
}
