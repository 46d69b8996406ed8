//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding an envelope payload
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload ends before a field is complete
    #[error("payload truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    /// A string field is not valid UTF-8
    #[error("field '{0}' is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// Unknown message kind tag
    #[error("invalid message kind: {0}")]
    InvalidMessageKind(u8),

    /// The record has no application id to route by
    #[error("envelope has no app id")]
    MissingAppId,

    /// Bytes remain after the last field
    #[error("{count} trailing bytes after envelope")]
    TrailingBytes { count: usize },
}

impl ProtocolError {
    /// Create a truncation error
    #[inline]
    pub fn truncated(expected: usize, actual: usize) -> Self {
        Self::Truncated { expected, actual }
    }
}
