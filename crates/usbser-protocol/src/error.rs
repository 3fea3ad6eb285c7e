//! Error types for chip register encoding

use thiserror::Error;

/// Errors produced while encoding line settings or decoding chip responses
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Baud rate cannot be expressed by the chip
    #[error("unsupported baud rate: {requested}")]
    UnsupportedBaudRate { requested: u32 },

    /// Setting exists in the line model but not on this chip
    #[error("unsupported setting: {0}")]
    Unsupported(String),

    /// Chip answered with fewer bytes than the request asked for
    #[error("short response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    /// Framing string could not be parsed
    #[error("invalid framing: {0}")]
    InvalidFraming(String),
}
