//! Error types for queue, transport and configuration operations.

use thiserror::Error;

/// Failure at the protocol or network layer
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Broker rejected request: {message}")]
    Rejected { message: String },

    #[error("Send to '{destination}' failed: {message}")]
    SendFailed {
        destination: String,
        message: String,
    },

    #[error("Subscription to '{destination}' failed: {message}")]
    SubscribeFailed {
        destination: String,
        message: String,
    },

    #[error("Acknowledgement of '{ack_id}' failed: {message}")]
    AckFailed { ack_id: String, message: String },

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Check if error is transient and the operation may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::ConnectionLost { .. } => true,
            Self::Rejected { .. } => false,
            Self::SendFailed { .. } => true,
            Self::SubscribeFailed { .. } => true,
            Self::AckFailed { .. } => false,
            Self::Frame(_) => false,
            Self::Io(_) => true,
        }
    }

    /// Check if the connection is unusable after this error.
    ///
    /// A broker closes the connection after sending an ERROR frame, and a
    /// malformed frame leaves the byte stream out of sync, so both count.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionLost { .. }
                | Self::Rejected { .. }
                | Self::Frame(_)
                | Self::Io(_)
        )
    }
}

/// Errors while encoding or decoding STOMP frames
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame has no command")]
    MissingCommand,

    #[error("Malformed header line: {line}")]
    InvalidHeader { line: String },

    #[error("Invalid escape sequence '\\{sequence}' in header")]
    InvalidEscape { sequence: char },

    #[error("Frame headers are not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid content-length header: {value}")]
    InvalidContentLength { value: String },

    #[error("Frame body is not terminated by NUL")]
    MissingTerminator,

    #[error("Frame exceeds size limit: {size} bytes (max: {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },
}

/// Caller passed an item that cannot be acknowledged.
///
/// Never raised out of the adapter; acknowledging such an item is a no-op.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MisuseError {
    #[error("Item '{item_id}' does not carry a broker frame")]
    MissingFrame { item_id: String },

    #[error("Frame '{command}' of item '{item_id}' cannot be acknowledged")]
    NotAcknowledgeable { item_id: String, command: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Invalid settings for queue '{queue}': {message}")]
    Queue { queue: String, message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
