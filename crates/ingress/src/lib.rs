//! Weir Ingress - framed TCP listener
//!
//! The ingress accepts many concurrent producer connections, optionally
//! behind mutual TLS, and decodes a stream of `u32 little-endian length |
//! payload` records from each. Every successfully unmarshalled payload is
//! published as one envelope onto a single channel feeding the message
//! router.
//!
//! # Lifecycle
//!
//! - `IngressListener::new` binds the socket and freezes the counter names
//! - `start()` runs the accept loop; one reader task per connection
//! - `stop()` cancels the shutdown token, which aborts in-flight reads and
//!   envelope publishes, then waits for the accept loop to acknowledge
//!
//! A connection ends on clean EOF (silent), any read error (logged,
//! counted), or listener shutdown. An unparseable payload is dropped
//! without closing the connection.

mod error;
mod listener;
mod metrics;
mod reader;
pub mod tls;

pub use error::{IngressError, TlsConfigError};
pub use listener::IngressListener;
pub use metrics::{IngressMetrics, IngressMetricsSnapshot};
pub use reader::RecordBuffer;
