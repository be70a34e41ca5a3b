//! Message types for queue operations including core domain identifiers.

use crate::error::{MisuseError, ValidationError};
use crate::frame::{bytes_serde, header, Frame, MAP_TRANSFORMATION};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated broker destination such as `/queue/jobs` or `/topic/events.created`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DestinationName(String);

impl DestinationName {
    /// Create new destination name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() || name.len() > 255 {
            return Err(ValidationError::OutOfRange {
                field: "destination".to_string(),
                message: "must be 1-255 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | ':' | '*' | '>'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "destination".to_string(),
                message: "only ASCII alphanumeric and '/', '-', '_', '.', ':', '*', '>' allowed"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DestinationName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DestinationName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DestinationName> for String {
    fn from(value: DestinationName) -> Self {
        value.0
    }
}

/// Broker-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Outbound Messages
// ============================================================================

/// Final message body and headers handed to the transport for sending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    /// Create message with an opaque body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// Create a `text/plain` message
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into()).with_header(header::CONTENT_TYPE, "text/plain")
    }

    /// Create a key/value map message
    pub fn map(map: &Map<String, Value>) -> Self {
        Self::new(Value::Object(map.clone()).to_string())
            .with_header(header::CONTENT_TYPE, "application/json")
            .with_header(header::TRANSFORMATION, MAP_TRANSFORMATION)
    }

    /// Encode arbitrary data the default way.
    ///
    /// Objects become map messages, strings become text messages and every
    /// other value is sent as JSON text.
    pub fn from_value(data: &Value) -> Self {
        match data {
            Value::Object(map) => Self::map(map),
            Value::String(text) => Self::text(text.clone()),
            other => Self::new(other.to_string())
                .with_header(header::CONTENT_TYPE, "application/json"),
        }
    }

    /// Add or replace a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

// ============================================================================
// Claimed Items
// ============================================================================

/// Decoded content of a received frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Key/value contents of a map message
    Map(Map<String, Value>),
    /// Raw body of a generic message
    #[serde(with = "bytes_serde")]
    Body(Bytes),
    /// Frame of a kind the adapter does not interpret, passed through unchanged
    Frame(Frame),
}

impl Payload {
    /// Decode a received frame.
    ///
    /// Map messages yield their entries, other MESSAGE frames their raw
    /// body, and anything else is returned as the frame itself.
    pub fn decode(frame: &Frame) -> Self {
        if !frame.is_message() {
            return Self::Frame(frame.clone());
        }

        if frame.get_header(header::TRANSFORMATION) == Some(MAP_TRANSFORMATION) {
            if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(frame.body()) {
                return Self::Map(map);
            }
        }

        Self::Body(frame.body().clone())
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Body(body) => Some(body),
            _ => None,
        }
    }

    /// Body as UTF-8 text, if it is one
    pub fn as_text(&self) -> Option<&str> {
        self.as_bytes()
            .and_then(|body| std::str::from_utf8(body).ok())
    }
}

/// A message claimed from the queue, awaiting acknowledgement.
///
/// The frame it was read from is kept untouched because it is the only
/// value the broker accepts in an acknowledgement. Items rebuilt from their
/// serialized form carry no frame and cannot be acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedItem {
    pub item_id: MessageId,
    #[serde(skip)]
    message: Option<Frame>,
    pub data: Payload,
}

impl ClaimedItem {
    /// Create an item backed by the frame it was read from
    pub fn new(item_id: MessageId, message: Frame, data: Payload) -> Self {
        Self {
            item_id,
            message: Some(message),
            data,
        }
    }

    /// Create an item that has no broker frame behind it
    pub fn detached(item_id: MessageId, data: Payload) -> Self {
        Self {
            item_id,
            message: None,
            data,
        }
    }

    pub fn message(&self) -> Option<&Frame> {
        self.message.as_ref()
    }

    /// Frame to reference in an acknowledgement
    pub fn acknowledgeable_frame(&self) -> Result<&Frame, MisuseError> {
        let frame = self.message.as_ref().ok_or_else(|| MisuseError::MissingFrame {
            item_id: self.item_id.to_string(),
        })?;

        if !frame.is_acknowledgeable() {
            return Err(MisuseError::NotAcknowledgeable {
                item_id: self.item_id.to_string(),
                command: frame.command().to_string(),
            });
        }

        Ok(frame)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
