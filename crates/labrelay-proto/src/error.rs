//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding frames or decoding payload records.
///
/// The streaming parser never returns these: malformed bytes on the wire are
/// dropped and counted instead. They surface only where a caller has to decide
/// what to do next (reply with an error Ack, refuse to send, ...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds the codec's ceiling.
    #[error("payload too large: maximum {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Message type is not part of the catalog.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Payload length does not match the record size for its message type.
    #[error("bad payload length for message 0x{msg_type:02X}: expected {expected} bytes, got {actual}")]
    PayloadLength {
        /// Message type of the offending frame.
        msg_type: u8,
        /// Size of the fixed-layout record.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// A field holds a value outside its defined range.
    #[error("invalid {field} value: {value}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Raw value received.
        value: u8,
    },
}

impl ProtocolError {
    /// Whether a request carrying this error deserves an `Ack{status=Err}`.
    ///
    /// Unknown message types are dropped without an Ack so the commanding side
    /// does not start retrying traffic it never sent.
    pub fn warrants_error_ack(&self) -> bool {
        !matches!(self, ProtocolError::UnknownMessageType(_))
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
