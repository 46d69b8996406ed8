//! Dump sink - per-app ring buffer of recent envelopes
//!
//! The router lazily creates one `DumpSink` per application the first time
//! an envelope for it arrives. The sink task drains its channel into a
//! fixed-size ring shared with the router, which reads snapshots for
//! playback requests and websocket prefill.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use weir_protocol::Envelope;

use crate::handle::{SinkHandle, SinkKind, SinkStats};

/// Ring buffer of the most recent envelopes for one application
#[derive(Debug)]
pub struct DumpBuffer {
    inner: RwLock<Ring>,
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<Arc<Envelope>>>,
    write_pos: usize,
    total_written: u64,
    capacity: usize,
}

impl DumpBuffer {
    /// Create a buffer retaining the last `capacity` envelopes
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(Ring {
                slots: vec![None; capacity],
                write_pos: 0,
                total_written: 0,
                capacity,
            }),
        }
    }

    /// Append an envelope, evicting the oldest when full
    pub fn push(&self, envelope: Arc<Envelope>) {
        let mut inner = self.inner.write();
        let pos = inner.write_pos;
        inner.slots[pos] = Some(envelope);
        inner.write_pos = (pos + 1) % inner.capacity;
        inner.total_written += 1;
    }

    /// All retained envelopes, oldest first
    pub fn snapshot(&self) -> Vec<Arc<Envelope>> {
        self.last_n(usize::MAX)
    }

    /// The most recent `n` envelopes, oldest first
    pub fn last_n(&self, n: usize) -> Vec<Arc<Envelope>> {
        let inner = self.inner.read();

        let available = inner.total_written.min(inner.capacity as u64) as usize;
        let n = n.min(available);
        if n == 0 {
            return Vec::new();
        }

        // write_pos is the next write slot; read the last n slots before it
        let start = (inner.write_pos + inner.capacity - n) % inner.capacity;

        let mut result = Vec::with_capacity(n);
        for i in 0..n {
            let pos = (start + i) % inner.capacity;
            if let Some(ref envelope) = inner.slots[pos] {
                result.push(Arc::clone(envelope));
            }
        }
        result
    }

    /// Number of retained envelopes
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.total_written.min(inner.capacity as u64) as usize
    }

    /// Whether the buffer has seen any envelope
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum retained envelopes
    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }
}

/// Sink task that fills a per-app `DumpBuffer`
pub struct DumpSink {
    app_id: String,
    buffer: Arc<DumpBuffer>,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    stats: Arc<SinkStats>,
}

impl DumpSink {
    /// Create the sink and its router-facing handle.
    ///
    /// The handle carries the shared ring so the router can snapshot it;
    /// the channel is sized to the ring capacity.
    pub fn new(app_id: impl Into<String>, capacity: usize) -> (Self, SinkHandle) {
        let app_id = app_id.into();
        let buffer = Arc::new(DumpBuffer::with_capacity(capacity));
        let stats = Arc::new(SinkStats::new());
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let handle = SinkHandle::new(
            SinkKind::Dump,
            app_id.clone(),
            app_id.clone(),
            false,
            sender,
            Arc::clone(&stats),
        )
        .with_dump_buffer(Arc::clone(&buffer));

        (
            Self {
                app_id,
                buffer,
                receiver,
                stats,
            },
            handle,
        )
    }

    /// The shared ring buffer
    pub fn buffer(&self) -> Arc<DumpBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Consume envelopes into the ring until the channel closes
    pub async fn run(mut self) {
        while let Some(envelope) = self.receiver.recv().await {
            self.stats.record();
            self.buffer.push(envelope);
        }
        tracing::debug!(app_id = %self.app_id, "dump sink stopped");
    }
}

#[cfg(test)]
#[path = "dump_test.rs"]
mod tests;
