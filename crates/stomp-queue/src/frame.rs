//! STOMP 1.2 frame model and incremental codec.
//!
//! A frame on the wire is a command line, zero or more `name:value` header
//! lines, a blank line, the body and a terminating NUL octet. Single EOLs
//! between frames are heart-beats and decode to [`StompItem::Heartbeat`].

use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;

// ============================================================================
// Commands and Headers
// ============================================================================

pub mod command {
    pub const CONNECT: &str = "CONNECT";
    pub const STOMP: &str = "STOMP";
    pub const CONNECTED: &str = "CONNECTED";
    pub const SEND: &str = "SEND";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    pub const ACK: &str = "ACK";
    pub const NACK: &str = "NACK";
    pub const DISCONNECT: &str = "DISCONNECT";
    pub const MESSAGE: &str = "MESSAGE";
    pub const RECEIPT: &str = "RECEIPT";
    pub const ERROR: &str = "ERROR";
}

pub mod header {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CLIENT_ID: &str = "client-id";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const SUBSCRIPTION_NAME: &str = "activemq.subscriptionName";
    pub const TRANSFORMATION: &str = "transformation";
    pub const VERSION: &str = "version";
}

/// Transformation header value marking a body that is a JSON key/value map
pub const MAP_TRANSFORMATION: &str = "jms-map-json";

/// Default upper bound for a single decoded frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Frame
// ============================================================================

/// A single STOMP frame: command, ordered headers and an opaque body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    command: String,
    headers: Vec<(String, String)>,
    #[serde(with = "bytes_serde")]
    body: Bytes,
}

impl Frame {
    /// Create a frame with the given command and no headers or body
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Look up a header value.
    ///
    /// When a header is repeated only the first occurrence counts.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_message(&self) -> bool {
        self.command == command::MESSAGE
    }

    pub fn message_id(&self) -> Option<&str> {
        self.get_header(header::MESSAGE_ID)
    }

    /// Identifier an ACK frame must reference.
    ///
    /// STOMP 1.2 brokers send a dedicated `ack` header; older brokers only
    /// provide `message-id`.
    pub fn ack_id(&self) -> Option<&str> {
        self.get_header(header::ACK)
            .or_else(|| self.message_id())
            .filter(|id| !id.is_empty())
    }

    /// True for MESSAGE frames that carry something an ACK can reference
    pub fn is_acknowledgeable(&self) -> bool {
        self.is_message() && self.ack_id().is_some()
    }

    /// Serialize the frame to its wire representation.
    ///
    /// A `content-length` header is added for non-empty bodies unless the
    /// caller already supplied one.
    pub fn encode(&self) -> Bytes {
        let escape = escapes_headers(&self.command);
        let mut buf = BytesMut::with_capacity(self.command.len() + 64 + self.body.len());

        buf.put_slice(self.command.as_bytes());
        buf.put_u8(b'\n');

        for (name, value) in &self.headers {
            if escape {
                buf.put_slice(escape_header(name).as_bytes());
                buf.put_u8(b':');
                buf.put_slice(escape_header(value).as_bytes());
            } else {
                buf.put_slice(name.as_bytes());
                buf.put_u8(b':');
                buf.put_slice(value.as_bytes());
            }
            buf.put_u8(b'\n');
        }

        if !self.body.is_empty() && self.get_header(header::CONTENT_LENGTH).is_none() {
            buf.put_slice(format!("{}:{}\n", header::CONTENT_LENGTH, self.body.len()).as_bytes());
        }

        buf.put_u8(b'\n');
        buf.put_slice(&self.body);
        buf.put_u8(0);
        buf.freeze()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        if let Some(id) = self.message_id() {
            write!(f, " [{}]", id)?;
        }
        write!(f, " ({} bytes)", self.body.len())
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// One unit read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A bare EOL sent to keep the connection alive
    Heartbeat,
    Frame(Frame),
}

/// Decode the next item from `buf`, consuming its bytes.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete item.
pub fn decode(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<StompItem>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        b'\n' => {
            let _ = buf.split_to(1);
            return Ok(Some(StompItem::Heartbeat));
        }
        b'\r' => {
            if buf.len() < 2 {
                return Ok(None);
            }
            if buf[1] == b'\n' {
                let _ = buf.split_to(2);
                return Ok(Some(StompItem::Heartbeat));
            }
        }
        _ => {}
    }

    let Some((header_end, body_start)) = find_header_end(buf) else {
        return incomplete(buf.len(), max_frame_size);
    };

    let head = std::str::from_utf8(&buf[..header_end]).map_err(|_| FrameError::InvalidUtf8)?;
    let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

    let command = match lines.next() {
        Some(command) if !command.is_empty() => command.to_string(),
        _ => return Err(FrameError::MissingCommand),
    };

    let unescape = escapes_headers(&command);
    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(FrameError::InvalidHeader {
                line: line.to_string(),
            });
        };
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == header::CONTENT_LENGTH)
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength {
                    value: value.clone(),
                })
        })
        .transpose()?;

    let body_end = match content_length {
        Some(length) => {
            let end = match body_start.checked_add(length) {
                Some(end) if end < max_frame_size => end,
                _ => {
                    return Err(FrameError::FrameTooLarge {
                        size: body_start.saturating_add(length).saturating_add(1),
                        max_size: max_frame_size,
                    })
                }
            };
            if buf.len() <= end {
                return incomplete(end + 1, max_frame_size);
            }
            if buf[end] != 0 {
                return Err(FrameError::MissingTerminator);
            }
            end
        }
        None => match buf[body_start..].iter().position(|&b| b == 0) {
            Some(offset) => body_start + offset,
            None => return incomplete(buf.len(), max_frame_size),
        },
    };

    if body_end + 1 > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: body_end + 1,
            max_size: max_frame_size,
        });
    }

    let raw = buf.split_to(body_end + 1).freeze();
    Ok(Some(StompItem::Frame(Frame {
        command,
        headers,
        body: raw.slice(body_start..body_end),
    })))
}

fn incomplete(size: usize, max_frame_size: usize) -> Result<Option<StompItem>, FrameError> {
    if size > max_frame_size {
        Err(FrameError::FrameTooLarge {
            size,
            max_size: max_frame_size,
        })
    } else {
        Ok(None)
    }
}

/// Locate the blank line ending the header block.
///
/// Returns the offset where the header text ends and where the body starts.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut index = 0;
    while index < buf.len() {
        if buf[index] == b'\n' {
            match buf.get(index + 1) {
                Some(b'\n') => return Some((index, index + 2)),
                Some(b'\r') if buf.get(index + 2) == Some(&b'\n') => {
                    return Some((index, index + 3))
                }
                _ => {}
            }
        }
        index += 1;
    }
    None
}

/// CONNECT and CONNECTED frames predate header escaping and are exempt
fn escapes_headers(command: &str) -> bool {
    command != command::CONNECT && command != command::CONNECTED
}

fn escape_header(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_header(value: &str) -> Result<String, FrameError> {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some('c') => unescaped.push(':'),
            Some(other) => return Err(FrameError::InvalidEscape { sequence: other }),
            None => return Err(FrameError::InvalidEscape { sequence: ' ' }),
        }
    }
    Ok(unescaped)
}

/// Base64 serialization for binary bodies
pub(crate) mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}
