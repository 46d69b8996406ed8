//! Framed reader tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use weir_protocol::{encode, Envelope, EnvelopeCodec, LogMessage, MessageKind, SourceType};

use crate::metrics::IngressMetrics;
use crate::reader::{read_record_len, read_records, RecordBuffer};

fn peer() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = (payload.len() as u32).to_le_bytes().to_vec();
    framed.extend_from_slice(payload);
    framed
}

fn sample_payload(text: &str) -> Vec<u8> {
    let message = LogMessage::new("app", text.as_bytes().to_vec(), MessageKind::Out, SourceType::Dea);
    encode(&message).to_vec()
}

// ============================================================================
// RecordBuffer
// ============================================================================

#[test]
fn test_record_buffer_grows_monotonically() {
    let mut buffer = RecordBuffer::new();
    assert_eq!(buffer.capacity(), 0);

    assert_eq!(buffer.fill(10).len(), 10);
    assert_eq!(buffer.capacity(), 10);

    // smaller records reuse the existing storage
    assert_eq!(buffer.fill(4).len(), 4);
    assert_eq!(buffer.capacity(), 10);

    assert_eq!(buffer.fill(32).len(), 32);
    assert_eq!(buffer.capacity(), 32);
}

#[test]
fn test_record_buffer_zero_length_record() {
    let mut buffer = RecordBuffer::new();
    assert_eq!(buffer.fill(0).len(), 0);
    assert_eq!(buffer.capacity(), 0);
}

// ============================================================================
// Length header
// ============================================================================

#[tokio::test]
async fn test_read_len_little_endian() {
    let mut input: &[u8] = &[0x2a, 0x00, 0x00, 0x00];
    assert_eq!(read_record_len(&mut input).await.unwrap(), Some(42));
}

#[tokio::test]
async fn test_read_len_clean_eof() {
    let mut input: &[u8] = &[];
    assert_eq!(read_record_len(&mut input).await.unwrap(), None);
}

#[tokio::test]
async fn test_read_len_partial_header_is_error() {
    let mut input: &[u8] = &[0x01, 0x02];
    let err = read_record_len(&mut input).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

// ============================================================================
// Record loop
// ============================================================================

struct ReaderHarness {
    envelope_rx: mpsc::Receiver<Arc<Envelope>>,
    metrics: Arc<IngressMetrics>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn spawn_reader(channel_capacity: usize) -> (tokio::io::DuplexStream, ReaderHarness) {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let (envelope_tx, envelope_rx) = mpsc::channel(channel_capacity);
    let metrics = Arc::new(IngressMetrics::new("test"));
    let shutdown = CancellationToken::new();

    let task_metrics = Arc::clone(&metrics);
    let task_shutdown = shutdown.clone();
    let task = tokio::spawn(async move {
        read_records(
            &mut server,
            peer(),
            &EnvelopeCodec::new(),
            &envelope_tx,
            &task_shutdown,
            &task_metrics,
        )
        .await;
    });

    (
        client,
        ReaderHarness {
            envelope_rx,
            metrics,
            shutdown,
            task,
        },
    )
}

#[tokio::test]
async fn test_reader_publishes_envelopes_in_order() {
    let (mut client, mut harness) = spawn_reader(16);

    for i in 0..3 {
        client
            .write_all(&frame(&sample_payload(&format!("line {i}"))))
            .await
            .unwrap();
    }
    client.shutdown().await.unwrap();
    drop(client);

    for i in 0..3 {
        let envelope = harness.envelope_rx.recv().await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&envelope.log_message().message),
            format!("line {i}")
        );
    }

    harness.task.await.unwrap();
    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.received_message_count, 3);
    assert_eq!(snapshot.receive_error_count, 0);
}

#[tokio::test]
async fn test_reader_counts_framing_header_bytes() {
    let (mut client, harness) = spawn_reader(16);

    let payload = sample_payload("counted");
    client.write_all(&frame(&payload)).await.unwrap();
    drop(client);

    harness.task.await.unwrap();
    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.received_message_count, 1);
    assert_eq!(snapshot.received_byte_count, payload.len() as u64 + 4);
}

#[tokio::test]
async fn test_clean_eof_is_not_an_error() {
    let (client, harness) = spawn_reader(16);
    drop(client);

    harness.task.await.unwrap();
    assert_eq!(harness.metrics.snapshot().receive_error_count, 0);
}

#[tokio::test]
async fn test_short_payload_counts_one_error() {
    let (mut client, harness) = spawn_reader(16);

    client.write_all(&100u32.to_le_bytes()).await.unwrap();
    client.write_all(b"only a few bytes").await.unwrap();
    drop(client);

    harness.task.await.unwrap();
    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.receive_error_count, 1);
    assert_eq!(snapshot.received_message_count, 0);
}

#[tokio::test]
async fn test_unparseable_record_is_skipped_silently() {
    let (mut client, mut harness) = spawn_reader(16);

    client.write_all(&frame(b"garbage record")).await.unwrap();
    client
        .write_all(&frame(&sample_payload("valid after garbage")))
        .await
        .unwrap();
    drop(client);

    let envelope = harness.envelope_rx.recv().await.unwrap();
    assert_eq!(
        String::from_utf8_lossy(&envelope.log_message().message),
        "valid after garbage"
    );

    harness.task.await.unwrap();
    let snapshot = harness.metrics.snapshot();
    // the bad record neither counts as received nor as an error
    assert_eq!(snapshot.received_message_count, 1);
    assert_eq!(snapshot.receive_error_count, 0);
}

#[tokio::test]
async fn test_zero_length_record_reaches_unmarshaller() {
    let (mut client, harness) = spawn_reader(16);

    // a zero-byte payload is framed fine; the codec rejects it
    client.write_all(&frame(b"")).await.unwrap();
    drop(client);

    harness.task.await.unwrap();
    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.received_message_count, 0);
    assert_eq!(snapshot.receive_error_count, 0);
}

#[tokio::test]
async fn test_shutdown_aborts_blocked_publish() {
    let (mut client, harness) = spawn_reader(1);

    // fill the channel, then one more record to block the publish
    client
        .write_all(&frame(&sample_payload("first")))
        .await
        .unwrap();
    client
        .write_all(&frame(&sample_payload("second")))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), harness.task)
        .await
        .expect("reader should exit on shutdown")
        .unwrap();

    // the receiver was never drained: only the first envelope got through
    let mut harness_rx = harness.envelope_rx;
    assert_eq!(
        String::from_utf8_lossy(&harness_rx.recv().await.unwrap().log_message().message),
        "first"
    );
    assert!(harness_rx.try_recv().is_err());
}
