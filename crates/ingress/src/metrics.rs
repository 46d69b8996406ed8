//! Listener counters
//!
//! Counter names are derived from the configured context prefix at
//! construction and never change afterwards.

use std::sync::atomic::{AtomicU64, Ordering};

use weir_metrics::{Context, Instrumentable, Metric};

/// Atomic counters for one listener
#[derive(Debug)]
pub struct IngressMetrics {
    context_name: String,
    message_count_name: String,
    byte_count_name: String,
    error_count_name: String,

    received_message_count: AtomicU64,
    received_byte_count: AtomicU64,
    receive_error_count: AtomicU64,
}

impl IngressMetrics {
    /// Create counters named under `context_name`
    pub fn new(context_name: &str) -> Self {
        Self {
            message_count_name: format!("{context_name}.receivedMessageCount"),
            byte_count_name: format!("{context_name}.receivedByteCount"),
            error_count_name: format!("{context_name}.receiveErrorCount"),
            context_name: context_name.to_owned(),
            received_message_count: AtomicU64::new(0),
            received_byte_count: AtomicU64::new(0),
            receive_error_count: AtomicU64::new(0),
        }
    }

    /// Record one routed envelope and its wire size (framing header
    /// included)
    #[inline]
    pub fn message_received(&self, wire_bytes: u64) {
        self.received_message_count.fetch_add(1, Ordering::Relaxed);
        self.received_byte_count
            .fetch_add(wire_bytes, Ordering::Relaxed);
    }

    /// Record a handshake or framing failure
    #[inline]
    pub fn receive_error(&self) {
        self.receive_error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> IngressMetricsSnapshot {
        IngressMetricsSnapshot {
            received_message_count: self.received_message_count.load(Ordering::Relaxed),
            received_byte_count: self.received_byte_count.load(Ordering::Relaxed),
            receive_error_count: self.receive_error_count.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of listener counters
#[derive(Debug, Clone, Copy)]
pub struct IngressMetricsSnapshot {
    pub received_message_count: u64,
    pub received_byte_count: u64,
    pub receive_error_count: u64,
}

impl Instrumentable for IngressMetrics {
    fn emit(&self) -> Context {
        let snapshot = self.snapshot();
        Context::with_metrics(
            self.context_name.clone(),
            vec![
                Metric::counter(
                    self.message_count_name.clone(),
                    snapshot.received_message_count,
                ),
                Metric::counter(self.byte_count_name.clone(), snapshot.received_byte_count),
                Metric::counter(self.error_count_name.clone(), snapshot.receive_error_count),
            ],
        )
    }
}
