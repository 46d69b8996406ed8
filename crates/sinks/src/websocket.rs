//! Websocket sink - streams envelopes to one live subscriber
//!
//! The sink re-frames each envelope with the same `u32 little-endian
//! length | payload` layout the ingress accepts and writes it to the
//! subscriber's transport. The websocket session itself (upgrade,
//! keepalive, close frames) is owned by the upstream server; this task only
//! needs something to write ordered frames into.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use weir_protocol::{encode, Envelope, LENGTH_PREFIX_SIZE};

use crate::handle::{SinkHandle, SinkKind, SinkStats};

/// Channel capacity for envelopes queued to one subscriber
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Sink task streaming envelopes to one subscriber
pub struct WebsocketSink {
    app_id: String,
    client_address: String,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    stats: Arc<SinkStats>,
}

impl WebsocketSink {
    /// Create the sink and its router-facing handle.
    ///
    /// `client_address` identifies the subscriber and must be unique per
    /// app. Websocket sinks opt in to error envelopes.
    pub fn new(
        app_id: impl Into<String>,
        client_address: impl Into<String>,
    ) -> (Self, SinkHandle) {
        let app_id = app_id.into();
        let client_address = client_address.into();
        let stats = Arc::new(SinkStats::new());
        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        let handle = SinkHandle::new(
            SinkKind::Websocket,
            app_id.clone(),
            client_address.clone(),
            true,
            sender,
            Arc::clone(&stats),
        );

        (
            Self {
                app_id,
                client_address,
                receiver,
                stats,
            },
            handle,
        )
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The subscriber this sink streams to
    pub fn identifier(&self) -> &str {
        &self.client_address
    }

    /// Stream envelopes into `transport` until the channel closes or the
    /// subscriber goes away.
    pub async fn run<W>(mut self, mut transport: W)
    where
        W: AsyncWrite + Unpin + Send,
    {
        while let Some(envelope) = self.receiver.recv().await {
            self.stats.record();

            let payload = encode(envelope.log_message());
            let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
            frame.put_u32_le(payload.len() as u32);
            frame.put_slice(&payload);

            if let Err(err) = transport.write_all(&frame).await {
                tracing::debug!(
                    app_id = %self.app_id,
                    client = %self.client_address,
                    error = %err,
                    "subscriber went away"
                );
                return;
            }
            if transport.flush().await.is_err() {
                return;
            }
        }

        tracing::debug!(
            app_id = %self.app_id,
            client = %self.client_address,
            "websocket sink stopped"
        );
    }
}

#[cfg(test)]
#[path = "websocket_test.rs"]
mod tests;
