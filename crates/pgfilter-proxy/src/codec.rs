//! Frame codecs for the Postgres wire protocol.
//!
//! [`FrontendCodec`] decodes the client side of a connection. It starts in
//! the startup phase, where frames are untagged, and switches to tagged
//! frames once a regular startup message or a cancel request has been read.
//! Encryption requests keep it in the startup phase since the client follows
//! them with another startup packet.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::{
    BackendMessage, CANCEL_REQUEST_CODE, FrontendMessage, GSSENC_REQUEST_CODE, SSL_REQUEST_CODE,
    StartupMessage, StartupPacket, tags,
};

/// Largest startup packet accepted. Postgres uses the same limit.
pub const MAX_STARTUP_PACKET_SIZE: usize = 10_000;

/// Largest tagged message accepted (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Tagged,
}

/// Codec for messages sent by the client.
#[derive(Debug)]
pub struct FrontendCodec {
    phase: Phase,
    max_message_size: usize,
}

impl FrontendCodec {
    /// A codec expecting the connection's first packet.
    pub fn new() -> Self {
        Self {
            phase: Phase::Startup,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// A codec for a stream already past startup.
    pub fn tagged() -> Self {
        Self {
            phase: Phase::Tagged,
            ..Self::new()
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Whether the startup packet has been read.
    pub fn is_past_startup(&self) -> bool {
        self.phase == Phase::Tagged
    }

    fn decode_startup(&mut self, src: &mut BytesMut) -> Result<Option<StartupPacket>, ProtocolError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if length < 8 || length as usize > MAX_STARTUP_PACKET_SIZE {
            return Err(ProtocolError::InvalidLength {
                length: length.into(),
            });
        }

        let length = length as usize;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(4);
        let code = frame.get_i32();

        let packet = match code {
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE => {
                if frame.has_remaining() {
                    return Err(ProtocolError::Malformed("encryption request"));
                }
                if code == SSL_REQUEST_CODE {
                    StartupPacket::SslRequest
                } else {
                    StartupPacket::GssEncRequest
                }
            }
            CANCEL_REQUEST_CODE => {
                if frame.len() != 8 {
                    return Err(ProtocolError::Malformed("cancel request"));
                }
                self.phase = Phase::Tagged;
                StartupPacket::Cancel {
                    process_id: frame.get_i32(),
                    secret_key: frame.get_i32(),
                }
            }
            version if version >> 16 == 3 => {
                let parameters = parse_startup_parameters(&mut frame)?;
                self.phase = Phase::Tagged;
                StartupPacket::Startup(StartupMessage {
                    protocol_version: version,
                    parameters,
                })
            }
            version => return Err(ProtocolError::UnsupportedProtocolVersion(version)),
        };

        Ok(Some(packet))
    }
}

impl Default for FrontendCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrontendCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.phase == Phase::Startup {
            return Ok(self.decode_startup(src)?.map(FrontendMessage::Startup));
        }

        let Some((tag, body)) = decode_tagged(src, self.max_message_size)? else {
            return Ok(None);
        };

        if tag == tags::QUERY {
            return parse_query(body).map(Some);
        }

        Ok(Some(FrontendMessage::Other { tag, body }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated {
                remaining: buf.len(),
            }),
        }
    }
}

impl Encoder<FrontendMessage> for FrontendCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: FrontendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match message {
            FrontendMessage::Startup(packet) => encode_startup(&packet, dst),
            FrontendMessage::Query { text } => encode_query(text.as_bytes(), dst),
            FrontendMessage::UndecodableQuery { bytes } => encode_query(&bytes, dst),
            FrontendMessage::Other { tag, body } => encode_tagged(tag, &body, dst),
        }
    }
}

/// Codec for messages sent by the backend after the startup handshake.
///
/// The single-byte answer to an encryption request is not a tagged frame
/// and must be consumed before this codec is used.
#[derive(Debug)]
pub struct BackendCodec {
    max_message_size: usize,
}

impl BackendCodec {
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for BackendCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BackendCodec {
    type Item = BackendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_tagged(src, self.max_message_size)?.map(|(tag, body)| BackendMessage { tag, body }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated {
                remaining: buf.len(),
            }),
        }
    }
}

impl Encoder<BackendMessage> for BackendCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_tagged(message.tag, &message.body, dst)
    }
}

/// Split one `tag + length + body` frame off `src` if it is complete.
fn decode_tagged(
    src: &mut BytesMut,
    max_message_size: usize,
) -> Result<Option<(u8, Bytes)>, ProtocolError> {
    if src.len() < 5 {
        return Ok(None);
    }

    let length = i32::from_be_bytes([src[1], src[2], src[3], src[4]]);
    if length < 4 || length as usize > max_message_size {
        return Err(ProtocolError::InvalidLength {
            length: length.into(),
        });
    }

    let total = 1 + length as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let tag = src.get_u8();
    src.advance(4);
    let body = src.split_to(length as usize - 4).freeze();
    Ok(Some((tag, body)))
}

fn encode_tagged(tag: u8, body: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let length = i32::try_from(body.len() + 4).map_err(|_| ProtocolError::TooLarge(body.len()))?;
    dst.reserve(1 + length as usize);
    dst.put_u8(tag);
    dst.put_i32(length);
    dst.put_slice(body);
    Ok(())
}

fn encode_query(text: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    if text.contains(&0) {
        return Err(ProtocolError::Malformed("query"));
    }
    let mut body = BytesMut::with_capacity(text.len() + 1);
    body.put_slice(text);
    body.put_u8(0);
    encode_tagged(tags::QUERY, &body, dst)
}

fn encode_startup(packet: &StartupPacket, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let mut body = BytesMut::new();
    match packet {
        StartupPacket::SslRequest => body.put_i32(SSL_REQUEST_CODE),
        StartupPacket::GssEncRequest => body.put_i32(GSSENC_REQUEST_CODE),
        StartupPacket::Cancel {
            process_id,
            secret_key,
        } => {
            body.put_i32(CANCEL_REQUEST_CODE);
            body.put_i32(*process_id);
            body.put_i32(*secret_key);
        }
        StartupPacket::Startup(startup) => {
            body.put_i32(startup.protocol_version);
            for (name, value) in &startup.parameters {
                put_cstring(&mut body, name)?;
                put_cstring(&mut body, value)?;
            }
            body.put_u8(0);
        }
    }

    let length = i32::try_from(body.len() + 4).map_err(|_| ProtocolError::TooLarge(body.len()))?;
    dst.reserve(body.len() + 4);
    dst.put_i32(length);
    dst.put_slice(&body);
    Ok(())
}

fn put_cstring(dst: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    if s.as_bytes().contains(&0) {
        return Err(ProtocolError::Malformed("startup"));
    }
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
    Ok(())
}

fn get_cstring(src: &mut BytesMut) -> Result<String, ProtocolError> {
    let Some(null_pos) = src.iter().position(|&b| b == 0) else {
        return Err(ProtocolError::Malformed("startup"));
    };
    let bytes = src.split_to(null_pos);
    src.advance(1);
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::Malformed("startup"))
}

fn parse_startup_parameters(frame: &mut BytesMut) -> Result<Vec<(String, String)>, ProtocolError> {
    let mut parameters = Vec::new();
    loop {
        let name = get_cstring(frame)?;
        if name.is_empty() {
            break;
        }
        let value = get_cstring(frame)?;
        parameters.push((name, value));
    }

    if frame.has_remaining() {
        return Err(ProtocolError::Malformed("startup"));
    }
    Ok(parameters)
}

/// Query text is a single NUL-terminated string filling the whole body.
///
/// Text in a non-UTF-8 client encoding is kept as bytes for the handler to
/// decide on.
fn parse_query(body: Bytes) -> Result<FrontendMessage, ProtocolError> {
    let Some((&0, text)) = body.split_last() else {
        return Err(ProtocolError::Malformed("query"));
    };
    if text.contains(&0) {
        return Err(ProtocolError::Malformed("query"));
    }
    Ok(match std::str::from_utf8(text) {
        Ok(text) => FrontendMessage::Query {
            text: text.to_string(),
        },
        Err(_) => FrontendMessage::UndecodableQuery {
            bytes: body.slice(..body.len() - 1),
        },
    })
}
