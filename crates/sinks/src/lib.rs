//! Weir Sinks - per-application envelope consumers
//!
//! Three sink kinds hang off the message router:
//!
//! - `DumpSink` - ring buffer of the most recent envelopes for one app,
//!   used to backfill late subscribers
//! - `SyslogSink` - forwards envelopes to a remote syslog drain named by a
//!   URL carried in-band on messages
//! - `WebsocketSink` - streams envelopes to one live subscriber
//!
//! # Handle / task split
//!
//! Every sink is split into a long-lived task (`run()`, owns the channel
//! receiver) and a `SinkHandle` (the router-facing write end). The router's
//! registry owns the only long-lived sender, so removing a handle from the
//! registry closes the sink's channel exactly once and the task drains out.

mod dump;
mod error;
mod handle;
mod syslog;
mod websocket;

pub use dump::{DumpBuffer, DumpSink};
pub use error::SinkError;
pub use handle::{SinkHandle, SinkKind, SinkRef, SinkStats};
pub use syslog::writer::{format_rfc5424, SyslogWriter};
pub use syslog::SyslogSink;
pub use websocket::WebsocketSink;
