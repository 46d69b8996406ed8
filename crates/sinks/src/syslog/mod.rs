//! Syslog sink - forwards envelopes to a remote drain
//!
//! Each sink owns one `SyslogWriter` and is identified by its drain URL.
//! Delivery failures are reported onto the shared error channel as
//! synthetic envelopes addressed to the same application, so subscribers
//! can see that their drain is misbehaving.

pub(crate) mod writer;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use weir_protocol::Envelope;

use crate::error::SinkError;
use crate::handle::{SinkHandle, SinkKind, SinkStats};
use writer::SyslogWriter;

/// Channel capacity for envelopes queued to one drain
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Delivery attempts per envelope before it is dropped
const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Base wait between delivery attempts; grows linearly per attempt
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Sink task forwarding envelopes to one syslog drain
pub struct SyslogSink {
    app_id: String,
    drain_url: String,
    writer: SyslogWriter,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    error_tx: mpsc::Sender<Arc<Envelope>>,
    stats: Arc<SinkStats>,
}

impl SyslogSink {
    /// Create the sink and its router-facing handle.
    ///
    /// The handle's identifier is the drain URL; at most one sink per
    /// (app id, URL) pair may be registered.
    pub fn new(
        app_id: impl Into<String>,
        drain_url: impl Into<String>,
        writer: SyslogWriter,
        error_tx: mpsc::Sender<Arc<Envelope>>,
    ) -> (Self, SinkHandle) {
        let app_id = app_id.into();
        let drain_url = drain_url.into();
        let stats = Arc::new(SinkStats::new());
        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        let handle = SinkHandle::new(
            SinkKind::Syslog,
            app_id.clone(),
            drain_url.clone(),
            false,
            sender,
            Arc::clone(&stats),
        );

        (
            Self {
                app_id,
                drain_url,
                writer,
                receiver,
                error_tx,
                stats,
            },
            handle,
        )
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The drain URL this sink delivers to
    pub fn identifier(&self) -> &str {
        &self.drain_url
    }

    /// Forward envelopes until the channel closes
    pub async fn run(mut self) {
        tracing::info!(
            app_id = %self.app_id,
            drain = %self.drain_url,
            "syslog sink starting"
        );

        while let Some(envelope) = self.receiver.recv().await {
            self.stats.record();
            self.deliver(&envelope).await;
        }

        tracing::debug!(
            app_id = %self.app_id,
            drain = %self.drain_url,
            "syslog sink stopped"
        );
    }

    /// Attempt delivery with bounded retry; the envelope is dropped once
    /// the attempts are exhausted.
    async fn deliver(&mut self, envelope: &Envelope) {
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(RETRY_BACKOFF * (attempt - 1)).await;
            }

            match self.writer.write_envelope(envelope).await {
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(
                        app_id = %self.app_id,
                        drain = %self.drain_url,
                        attempt,
                        error = %err,
                        "syslog delivery failed"
                    );
                    self.report_failure(&err).await;
                }
            }
        }

        tracing::error!(
            app_id = %self.app_id,
            drain = %self.drain_url,
            "dropping envelope after repeated delivery failures"
        );
    }

    async fn report_failure(&self, err: &SinkError) {
        let text = format!("error writing to drain {}: {}", self.drain_url, err);
        let envelope = Arc::new(Envelope::error(&self.app_id, &text));
        if self.error_tx.send(envelope).await.is_err() {
            tracing::debug!(drain = %self.drain_url, "error channel closed");
        }
    }
}

#[cfg(test)]
#[path = "syslog_test.rs"]
mod tests;
