//! Envelope data model
//!
//! An `Envelope` wraps one decoded log record together with its wire size.
//! All routing is keyed by the envelope's application id; drain URLs carried
//! on the message drive syslog-forwarder reconciliation.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::ProtocolError;

/// Origin of a log message.
///
/// `WardenContainer` is the only source whose messages carry an
/// authoritative drain URL list; the router reconciles syslog drains
/// exclusively against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    CloudController,
    Router,
    Uaa,
    Dea,
    WardenContainer,
    Loggregator,
    /// Unrecognized tag, preserved so re-encoding round-trips.
    Unknown(u8),
}

impl SourceType {
    /// Decode from the wire byte
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::CloudController,
            1 => Self::Router,
            2 => Self::Uaa,
            3 => Self::Dea,
            4 => Self::WardenContainer,
            5 => Self::Loggregator,
            other => Self::Unknown(other),
        }
    }

    /// Encode to the wire byte
    pub fn as_u8(self) -> u8 {
        match self {
            Self::CloudController => 0,
            Self::Router => 1,
            Self::Uaa => 2,
            Self::Dea => 3,
            Self::WardenContainer => 4,
            Self::Loggregator => 5,
            Self::Unknown(other) => other,
        }
    }
}

/// Which output stream of the originating process produced the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Standard output
    Out,
    /// Standard error
    Err,
}

impl MessageKind {
    /// Decode from the wire byte; unknown values are rejected
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Out),
            2 => Some(Self::Err),
            _ => None,
        }
    }

    /// Encode to the wire byte
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Out => 1,
            Self::Err => 2,
        }
    }
}

/// The payload view of a log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Tenant identifier; never empty for a routed message
    pub app_id: String,

    /// Raw log line
    pub message: Bytes,

    /// stdout/stderr channel of the original line
    pub kind: MessageKind,

    /// Origin of the message
    pub source_type: SourceType,

    /// Syslog drain URLs advertised by the producer, in order
    pub drain_urls: Vec<String>,

    /// Producer-supplied timestamp, nanoseconds since the Unix epoch
    pub timestamp: i64,
}

impl LogMessage {
    /// Create a message with the current timestamp and no drains
    pub fn new(
        app_id: impl Into<String>,
        message: impl Into<Bytes>,
        kind: MessageKind,
        source_type: SourceType,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            message: message.into(),
            kind,
            source_type,
            drain_urls: Vec::new(),
            timestamp: now_nanos(),
        }
    }

    /// Synthetic delivery-failure message addressed to the same tenant
    pub fn error(app_id: impl Into<String>, text: &str) -> Self {
        Self {
            app_id: app_id.into(),
            message: Bytes::copy_from_slice(text.as_bytes()),
            kind: MessageKind::Err,
            source_type: SourceType::Loggregator,
            drain_urls: Vec::new(),
            timestamp: now_nanos(),
        }
    }

    /// Attach drain URLs
    #[must_use]
    pub fn with_drain_urls(mut self, drain_urls: Vec<String>) -> Self {
        self.drain_urls = drain_urls;
        self
    }
}

/// One decoded log record, routed as an indivisible unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    log_message: LogMessage,
    raw_message_length: u32,
}

impl Envelope {
    /// Wrap a decoded message together with its wire payload size
    ///
    /// Rejects messages without an application id - there is nothing to
    /// route them by.
    pub fn new(log_message: LogMessage, raw_message_length: u32) -> Result<Self, ProtocolError> {
        if log_message.app_id.is_empty() {
            return Err(ProtocolError::MissingAppId);
        }
        Ok(Self {
            log_message,
            raw_message_length,
        })
    }

    /// Synthetic error envelope produced inside the process (sink delivery
    /// failures). `app_id` must be non-empty.
    pub fn error(app_id: &str, text: &str) -> Self {
        debug_assert!(!app_id.is_empty());
        Self {
            raw_message_length: text.len() as u32,
            log_message: LogMessage::error(app_id, text),
        }
    }

    /// Tenant identifier
    pub fn app_id(&self) -> &str {
        &self.log_message.app_id
    }

    /// The decoded message payload
    pub fn log_message(&self) -> &LogMessage {
        &self.log_message
    }

    /// Drain URLs advertised on this message
    pub fn drain_urls(&self) -> &[String] {
        &self.log_message.drain_urls
    }

    /// Origin of the message
    pub fn source_type(&self) -> SourceType {
        self.log_message.source_type
    }

    /// Wire payload size, excluding the framing header (metrics/debug only)
    pub fn raw_message_length(&self) -> u32 {
        self.raw_message_length
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
