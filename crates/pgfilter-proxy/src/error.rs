//! Error types for the proxy crate.

use thiserror::Error;

/// Errors raised while framing the wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A length prefix is below the minimum or above the configured maximum.
    #[error("invalid message length {length}")]
    InvalidLength { length: i64 },

    /// The stream ended in the middle of a frame.
    #[error("connection closed in the middle of a message ({remaining} bytes buffered)")]
    Truncated { remaining: usize },

    /// The body of a frame does not match its message type.
    #[error("malformed {0} message")]
    Malformed(&'static str),

    /// The startup packet requests a protocol version we do not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(i32),

    /// A message is too large to encode.
    #[error("message too large to encode: {0} bytes")]
    TooLarge(usize),

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind to the listen address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    /// The listener failed in a way that will not recover.
    #[error("failed to accept connection: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// No backend address could be determined for a connection.
    #[error("failed to resolve backend: {0}")]
    ResolveFailed(String),

    /// Failed to connect to the backend.
    #[error("failed to connect to upstream {address}: {source}")]
    UpstreamConnectionFailed {
        address: String,
        source: std::io::Error,
    },

    /// The client sent a message type the policy does not allow.
    #[error("disallowed client command {}", display_tag(*.0))]
    CommandNotAllowed(u8),

    /// The handler closed the connection for another reason.
    #[error("connection terminated: {0}")]
    Terminated(String),

    /// Wire protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Socket error outside of framing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_tag(tag: u8) -> String {
    if tag.is_ascii_graphic() {
        (tag as char).to_string()
    } else {
        format!("0x{tag:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_not_allowed_message() {
        assert_eq!(
            ProxyError::CommandNotAllowed(b'P').to_string(),
            "disallowed client command P"
        );
        assert_eq!(
            ProxyError::CommandNotAllowed(0x02).to_string(),
            "disallowed client command 0x02"
        );
    }
}
