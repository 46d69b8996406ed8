//! Sink handle - the router-facing write end of a sink
//!
//! `SinkHandle` carries everything the router needs to route to a sink
//! without knowing its concrete type: identity (app id + identifier), the
//! kind tag for counter updates and prefill triggering, the error opt-in
//! flag, and the channel sender.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use weir_metrics::{Context, Instrumentable, Metric};
use weir_protocol::Envelope;

use crate::dump::DumpBuffer;

/// Kind of a sink; drives only counter updates and websocket prefill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Dump,
    Syslog,
    Websocket,
}

impl SinkKind {
    /// Lowercase label for logging and metric context names
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dump => "dump",
            Self::Syslog => "syslog",
            Self::Websocket => "websocket",
        }
    }
}

/// Delivery counters shared between a sink task and its handle
#[derive(Debug, Default)]
pub struct SinkStats {
    envelopes_received: AtomicU64,
}

impl SinkStats {
    pub const fn new() -> Self {
        Self {
            envelopes_received: AtomicU64::new(0),
        }
    }

    /// Record one envelope consumed by the sink task
    #[inline]
    pub fn record(&self) {
        self.envelopes_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Envelopes consumed so far
    pub fn received(&self) -> u64 {
        self.envelopes_received.load(Ordering::Relaxed)
    }
}

/// Identity of a registered sink, used to request unregistration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRef {
    pub kind: SinkKind,
    pub app_id: String,
    pub identifier: String,
}

/// Write end of a running sink
///
/// The registry must hold the only long-lived clone of the sender: dropping
/// the handle is what closes the sink's channel.
pub struct SinkHandle {
    kind: SinkKind,
    app_id: String,
    identifier: String,
    receive_errors: bool,
    sender: mpsc::Sender<Arc<Envelope>>,
    stats: Arc<SinkStats>,
    dump: Option<Arc<DumpBuffer>>,
}

impl SinkHandle {
    /// Create a handle for a sink task
    ///
    /// `identifier` is stable for the sink's lifetime; for syslog sinks it
    /// is the drain URL.
    pub fn new(
        kind: SinkKind,
        app_id: impl Into<String>,
        identifier: impl Into<String>,
        receive_errors: bool,
        sender: mpsc::Sender<Arc<Envelope>>,
        stats: Arc<SinkStats>,
    ) -> Self {
        Self {
            kind,
            app_id: app_id.into(),
            identifier: identifier.into(),
            receive_errors,
            sender,
            stats,
            dump: None,
        }
    }

    /// Attach the shared ring buffer (dump sinks only)
    #[must_use]
    pub fn with_dump_buffer(mut self, buffer: Arc<DumpBuffer>) -> Self {
        self.dump = Some(buffer);
        self
    }

    #[inline]
    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    #[inline]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    #[inline]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[inline]
    pub fn should_receive_errors(&self) -> bool {
        self.receive_errors
    }

    /// Send an envelope, waiting for channel capacity.
    ///
    /// Returns the envelope back if the sink task is gone.
    #[inline]
    pub async fn send(&self, envelope: Arc<Envelope>) -> Result<(), Arc<Envelope>> {
        self.sender.send(envelope).await.map_err(|e| e.0)
    }

    /// Clone the sender for a short-lived task (websocket prefill). The
    /// clone delays channel close until it is dropped, so it must not be
    /// held beyond one shot.
    pub fn sender(&self) -> mpsc::Sender<Arc<Envelope>> {
        self.sender.clone()
    }

    /// Check whether the sink task has dropped its receiver
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Ring buffer for dump sinks, `None` for other kinds
    pub fn dump_buffer(&self) -> Option<Arc<DumpBuffer>> {
        self.dump.clone()
    }

    /// Identity triple for unregistration requests
    pub fn sink_ref(&self) -> SinkRef {
        SinkRef {
            kind: self.kind,
            app_id: self.app_id.clone(),
            identifier: self.identifier.clone(),
        }
    }
}

impl Instrumentable for SinkHandle {
    fn emit(&self) -> Context {
        Context::with_metrics(
            format!("{}Sink:{}", self.kind.as_str(), self.identifier),
            vec![Metric::counter(
                "receivedMessageCount",
                self.stats.received(),
            )],
        )
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("kind", &self.kind)
            .field("app_id", &self.app_id)
            .field("identifier", &self.identifier)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[path = "handle_test.rs"]
mod tests;
