//! Framed connection reader
//!
//! One reader per accepted connection, decoding back-to-back
//! `u32 little-endian length | payload` records until EOF, a read error, or
//! listener shutdown.
//!
//! Policy per record:
//! - clean EOF at a record boundary ends the connection silently
//! - any other read error is counted and logged, and ends the connection
//! - an unparseable payload is skipped; the unmarshaller logs it
//! - a decoded envelope counts `payload + 4` bytes, then is published,
//!   unless shutdown wins the race

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use weir_protocol::{Envelope, Unmarshaller, LENGTH_PREFIX_SIZE};

use crate::metrics::IngressMetrics;

/// Grow-only payload buffer reused across records.
///
/// Capacity never shrinks, so steady-state reads allocate nothing. The
/// slice returned by `fill` is only valid until the next call; anything
/// retaining payload bytes past that must copy.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: Vec<u8>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a `len`-byte slice for the next record, growing the backing
    /// storage only when `len` exceeds what any earlier record needed.
    pub fn fill(&mut self, len: usize) -> &mut [u8] {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
        &mut self.buf[..len]
    }

    /// High-water mark of record sizes seen so far
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// Read framed records from `stream` until it ends.
pub(crate) async fn read_records<S>(
    stream: &mut S,
    peer: SocketAddr,
    unmarshaller: &dyn Unmarshaller,
    envelope_tx: &mpsc::Sender<Arc<Envelope>>,
    shutdown: &CancellationToken,
    metrics: &IngressMetrics,
) where
    S: AsyncRead + Unpin,
{
    let mut record = RecordBuffer::new();

    loop {
        let len = match read_record_len(stream).await {
            Ok(Some(len)) => len as usize,
            Ok(None) => {
                tracing::debug!(peer = %peer, "connection closed");
                return;
            }
            Err(err) => {
                metrics.receive_error();
                tracing::error!(peer = %peer, error = %err, "error while decoding record length");
                return;
            }
        };

        let payload = record.fill(len);
        if let Err(err) = stream.read_exact(payload).await {
            metrics.receive_error();
            tracing::error!(peer = %peer, error = %err, "error during i/o read");
            return;
        }

        let envelope = match unmarshaller.unmarshal(payload) {
            Ok(envelope) => envelope,
            // the unmarshaller logs its own failures; keep the connection
            Err(_) => continue,
        };

        metrics.message_received((len + LENGTH_PREFIX_SIZE) as u64);

        tokio::select! {
            _ = shutdown.cancelled() => return,
            sent = envelope_tx.send(Arc::new(envelope)) => {
                if sent.is_err() {
                    tracing::debug!(peer = %peer, "envelope channel closed");
                    return;
                }
            }
        }
    }
}

/// Read the 4-byte record length.
///
/// Returns `Ok(None)` on clean EOF at the record boundary; EOF inside the
/// header is an error like any other short read.
pub(crate) async fn read_record_len<S>(stream: &mut S) -> std::io::Result<Option<u32>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;

    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid record header",
            ));
        }
        filled += n;
    }

    Ok(Some(u32::from_le_bytes(buf)))
}

#[cfg(test)]
#[path = "reader_test.rs"]
mod tests;
