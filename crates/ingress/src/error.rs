//! Ingress error types

use std::io;

use thiserror::Error;

/// Errors from the TCP listener
#[derive(Debug, Error)]
pub enum IngressError {
    /// Failed to bind the listening socket
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors assembling the listener's TLS configuration
#[derive(Debug, Error)]
pub enum TlsConfigError {
    /// Certificate or private key could not be loaded
    #[error("failed to load keypair from '{cert}' / '{key}': {message}")]
    Keypair {
        cert: String,
        key: String,
        message: String,
    },

    /// CA bundle file could not be read
    #[error("failed to read ca cert file '{path}': {source}")]
    CaRead {
        path: String,
        #[source]
        source: io::Error,
    },

    /// CA bundle parsed but produced no trust anchors
    #[error("ca bundle '{path}' contains no usable certificates")]
    EmptyCaBundle { path: String },

    /// Client certificate verifier could not be built
    #[error("failed to build client certificate verifier: {0}")]
    ClientVerifier(String),

    /// Other TLS configuration failure
    #[error("invalid tls configuration: {0}")]
    Tls(#[from] rustls::Error),
}
