//! Sink handle tests

use std::sync::Arc;

use tokio::sync::mpsc;
use weir_metrics::{Instrumentable, MetricValue};
use weir_protocol::{Envelope, LogMessage, MessageKind, SourceType};

use crate::{SinkHandle, SinkKind, SinkStats};

fn envelope(app_id: &str) -> Arc<Envelope> {
    let message = LogMessage::new(app_id, "line", MessageKind::Out, SourceType::Dea);
    Arc::new(Envelope::new(message, 4).unwrap())
}

fn handle(receive_errors: bool) -> (SinkHandle, mpsc::Receiver<Arc<Envelope>>) {
    let (tx, rx) = mpsc::channel(8);
    let handle = SinkHandle::new(
        SinkKind::Websocket,
        "app",
        "client-1",
        receive_errors,
        tx,
        Arc::new(SinkStats::new()),
    );
    (handle, rx)
}

#[test]
fn test_identity_accessors() {
    let (handle, _rx) = handle(true);

    assert_eq!(handle.kind(), SinkKind::Websocket);
    assert_eq!(handle.app_id(), "app");
    assert_eq!(handle.identifier(), "client-1");
    assert!(handle.should_receive_errors());

    let sink_ref = handle.sink_ref();
    assert_eq!(sink_ref.kind, SinkKind::Websocket);
    assert_eq!(sink_ref.identifier, "client-1");
}

#[tokio::test]
async fn test_send_delivers_to_receiver() {
    let (handle, mut rx) = handle(false);

    handle.send(envelope("app")).await.unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.app_id(), "app");
}

#[tokio::test]
async fn test_dropping_handle_closes_channel() {
    let (handle, mut rx) = handle(false);

    drop(handle);

    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_send_fails_after_receiver_drops() {
    let (handle, rx) = handle(false);
    drop(rx);

    assert!(handle.is_closed());
    assert!(handle.send(envelope("app")).await.is_err());
}

#[test]
fn test_emit_names_the_sink() {
    let (handle, _rx) = handle(false);

    let context = handle.emit();
    assert_eq!(context.name, "websocketSink:client-1");
    assert_eq!(
        context.metric("receivedMessageCount"),
        Some(MetricValue::Counter(0))
    );
}

#[test]
fn test_kind_labels() {
    assert_eq!(SinkKind::Dump.as_str(), "dump");
    assert_eq!(SinkKind::Syslog.as_str(), "syslog");
    assert_eq!(SinkKind::Websocket.as_str(), "websocket");
}
