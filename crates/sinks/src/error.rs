//! Sink error types

use std::io;

use thiserror::Error;

/// Errors from sink construction and delivery
#[derive(Debug, Error)]
pub enum SinkError {
    /// Drain URL scheme has no writer
    #[error("unsupported drain scheme '{0}'")]
    UnsupportedScheme(String),

    /// Drain URL has no host component
    #[error("drain url '{0}' has no host")]
    MissingHost(String),

    /// Host is not usable as a TLS server name
    #[error("invalid server name '{name}': {message}")]
    InvalidServerName { name: String, message: String },

    /// TLS client configuration could not be built
    #[error("tls configuration failed: {0}")]
    TlsConfig(String),

    /// Could not reach the drain
    #[error("connection failed to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// TLS negotiation with the drain failed
    #[error("tls handshake failed with {target}: {source}")]
    TlsHandshake {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Write to the drain failed; the connection is discarded
    #[error("write failed to {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: io::Error,
    },
}
