//! Weir Protocol - envelope data model and wire codec
//!
//! This crate provides the types that flow through the ingress and routing
//! pipeline:
//! - `Envelope` - one decoded log record, routed as an indivisible unit
//! - `LogMessage` - the payload view the router reads (app id, drain URLs,
//!   source type)
//! - `Unmarshaller` - the capability the framed reader uses to turn raw
//!   payload bytes into envelopes
//! - `EnvelopeCodec` - the default binary codec
//!
//! # Design Principles
//!
//! - **Zero-copy where it matters**: message bodies are `bytes::Bytes`,
//!   envelopes fan out as `Arc<Envelope>` without re-serialization
//! - **Hand-parsed wire format**: length-checked field-by-field decoding
//!   with precise error variants, no schema compiler

mod codec;
mod envelope;
mod error;

pub use codec::{decode, encode, EnvelopeCodec, Unmarshaller};
pub use envelope::{Envelope, LogMessage, MessageKind, SourceType};
pub use error::ProtocolError;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Size of the record length prefix on the wire (u32, little-endian)
pub const LENGTH_PREFIX_SIZE: usize = 4;
