//! Binary envelope codec
//!
//! Wire layout of one framed payload (integers little-endian):
//!
//! ```text
//! u8  source type | u8 kind | i64 timestamp
//! u16 app id length | app id bytes (UTF-8)
//! u16 drain count | per drain: u16 length + bytes (UTF-8)
//! u32 message length | message bytes
//! ```
//!
//! App ids and drain URLs must fit in a `u16` length; message bodies in a
//! `u32`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Envelope, LogMessage, MessageKind, ProtocolError, SourceType};

/// Capability to turn one framed payload into an envelope.
///
/// Implementations log their own failures; the framed reader drops the
/// record and keeps the connection.
pub trait Unmarshaller: Send + Sync {
    fn unmarshal(&self, payload: &[u8]) -> Result<Envelope, ProtocolError>;
}

/// The default envelope unmarshaller
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Unmarshaller for EnvelopeCodec {
    fn unmarshal(&self, payload: &[u8]) -> Result<Envelope, ProtocolError> {
        decode(payload).map_err(|err| {
            tracing::debug!(error = %err, len = payload.len(), "discarding unparseable envelope");
            err
        })
    }
}

/// Encode a message into one framed payload (without the length prefix)
pub fn encode(message: &LogMessage) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        2 + 8 + 2 + message.app_id.len() + 2 + message.message.len() + 4,
    );
    buf.put_u8(message.source_type.as_u8());
    buf.put_u8(message.kind.as_u8());
    buf.put_i64_le(message.timestamp);
    buf.put_u16_le(message.app_id.len() as u16);
    buf.put_slice(message.app_id.as_bytes());
    buf.put_u16_le(message.drain_urls.len() as u16);
    for url in &message.drain_urls {
        buf.put_u16_le(url.len() as u16);
        buf.put_slice(url.as_bytes());
    }
    buf.put_u32_le(message.message.len() as u32);
    buf.put_slice(&message.message);
    buf.freeze()
}

/// Decode one framed payload.
///
/// The input slice is typically a reused read buffer that is only valid
/// until the next record arrives, so every retained field is copied out.
pub fn decode(payload: &[u8]) -> Result<Envelope, ProtocolError> {
    let mut reader = Reader::new(payload);

    let source_type = SourceType::from_u8(reader.u8()?);
    let kind_tag = reader.u8()?;
    let kind = MessageKind::from_u8(kind_tag).ok_or(ProtocolError::InvalidMessageKind(kind_tag))?;
    let timestamp = reader.i64_le()?;

    let app_id_len = reader.u16_le()? as usize;
    let app_id = reader.str(app_id_len, "app_id")?.to_owned();

    let drain_count = reader.u16_le()? as usize;
    let mut drain_urls = Vec::with_capacity(drain_count.min(16));
    for _ in 0..drain_count {
        let url_len = reader.u16_le()? as usize;
        drain_urls.push(reader.str(url_len, "drain_url")?.to_owned());
    }

    let message_len = reader.u32_le()? as usize;
    let message = Bytes::copy_from_slice(reader.take(message_len)?);

    if reader.remaining() != 0 {
        return Err(ProtocolError::TrailingBytes {
            count: reader.remaining(),
        });
    }

    Envelope::new(
        LogMessage {
            app_id,
            message,
            kind,
            source_type,
            drain_urls,
            timestamp,
        },
        payload.len() as u32,
    )
}

/// Length-checked sequential field reader
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or_else(|| ProtocolError::truncated(usize::MAX, self.buf.len()))?;
        if end > self.buf.len() {
            return Err(ProtocolError::truncated(end, self.buf.len()));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32_le(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i64_le(&mut self) -> Result<i64, ProtocolError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    fn str(&mut self, n: usize, field: &'static str) -> Result<&'a str, ProtocolError> {
        std::str::from_utf8(self.take(n)?).map_err(|_| ProtocolError::InvalidUtf8(field))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
