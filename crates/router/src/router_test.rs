//! Message router tests
//!
//! These drive the router through its public channel surface, the way the
//! ingress listener and the subscriber frontends do.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use weir_protocol::{Envelope, LogMessage, MessageKind, SourceType};
use weir_sinks::{SinkHandle, SinkKind, SinkRef, SinkStats};

use crate::{MessageRouter, RouterHandle, RouterInstrumentation};

fn envelope(app_id: &str, text: &str, source_type: SourceType, drains: &[&str]) -> Arc<Envelope> {
    let message = LogMessage::new(app_id, text.as_bytes().to_vec(), MessageKind::Out, source_type)
        .with_drain_urls(drains.iter().map(|s| s.to_string()).collect());
    Arc::new(Envelope::new(message, text.len() as u32).unwrap())
}

/// A bare sink the tests hold the read end of
fn test_sink(
    kind: SinkKind,
    app_id: &str,
    identifier: &str,
    receive_errors: bool,
) -> (SinkHandle, mpsc::Receiver<Arc<Envelope>>) {
    let (tx, rx) = mpsc::channel(128);
    let handle = SinkHandle::new(
        kind,
        app_id,
        identifier,
        receive_errors,
        tx,
        Arc::new(SinkStats::new()),
    );
    (handle, rx)
}

fn started_router(dump_buffer_size: usize) -> (RouterHandle, RouterInstrumentation) {
    let router = MessageRouter::new(dump_buffer_size, false);
    let handle = router.handle();
    let instrumentation = router.instrumentation();
    tokio::spawn(router.run());
    (handle, instrumentation)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

fn text(envelope: &Envelope) -> String {
    String::from_utf8_lossy(&envelope.log_message().message).into_owned()
}

// ============================================================================
// Websocket prefill
// ============================================================================

#[tokio::test]
async fn test_prefill_below_replay_limit_sends_everything() {
    let (router, _) = started_router(100);

    for i in 0..19 {
        router
            .envelope_sender()
            .send(envelope("appId", &format!("message {i}"), SourceType::Dea, &[]))
            .await
            .unwrap();
    }
    settle().await;

    let (ws, mut rx) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    assert!(router.open_sink(ws).await);
    settle().await;

    let mut received = Vec::new();
    while let Ok(Some(env)) = timeout(Duration::from_millis(100), rx.recv()).await {
        received.push(env);
    }
    assert_eq!(received.len(), 19);
}

#[tokio::test]
async fn test_prefill_truncates_to_most_recent_twenty() {
    let (router, _) = started_router(100);

    for i in 0..100 {
        router
            .envelope_sender()
            .send(envelope("appId", &format!("message {i}"), SourceType::Dea, &[]))
            .await
            .unwrap();
    }
    settle().await;

    let (ws, mut rx) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    assert!(router.open_sink(ws).await);
    settle().await;

    let mut received = Vec::new();
    while let Ok(Some(env)) = timeout(Duration::from_millis(100), rx.recv()).await {
        received.push(text(&env));
    }

    let expected: Vec<String> = (80..100).map(|i| format!("message {i}")).collect();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_prefill_without_dump_sink_sends_nothing() {
    let (router, _) = started_router(100);

    let (ws, mut rx) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    assert!(router.open_sink(ws).await);
    settle().await;

    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

// ============================================================================
// Error fan-out
// ============================================================================

#[tokio::test]
async fn test_errors_reach_sinks_that_accept_them() {
    let (router, _) = started_router(1024);

    let (sink, mut rx) = test_sink(SinkKind::Websocket, "appId", "client-1", true);
    router.open_sink(sink).await;
    settle().await;

    router
        .error_sender()
        .send(envelope("appId", "error msg", SourceType::Loggregator, &[]))
        .await
        .unwrap();

    let received = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("error should be delivered")
        .unwrap();
    assert_eq!(text(&received), "error msg");
}

#[tokio::test]
async fn test_errors_skip_sinks_that_reject_them() {
    let (router, _) = started_router(1024);

    let (sink, mut rx) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    router.open_sink(sink).await;
    settle().await;

    router
        .error_sender()
        .send(envelope("appId", "error msg", SourceType::Loggregator, &[]))
        .await
        .unwrap();

    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_errors_are_scoped_to_their_app() {
    let (router, _) = started_router(1024);

    let (sink, mut rx) = test_sink(SinkKind::Websocket, "other-app", "client-1", true);
    router.open_sink(sink).await;
    settle().await;

    router
        .error_sender()
        .send(envelope("appId", "error msg", SourceType::Loggregator, &[]))
        .await
        .unwrap();

    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

// ============================================================================
// Primary fan-out & dump management
// ============================================================================

#[tokio::test]
async fn test_envelopes_fan_out_to_registered_sinks_in_order() {
    let (router, _) = started_router(1024);

    let (sink, mut rx) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    router.open_sink(sink).await;
    settle().await;

    for i in 0..5 {
        router
            .envelope_sender()
            .send(envelope("appId", &format!("m{i}"), SourceType::Dea, &[]))
            .await
            .unwrap();
    }

    for i in 0..5 {
        let received = timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("fan-out should deliver")
            .unwrap();
        assert_eq!(text(&received), format!("m{i}"));
    }
}

#[tokio::test]
async fn test_dump_sink_is_created_lazily_once() {
    let (router, instrumentation) = started_router(1024);

    router
        .envelope_sender()
        .send(envelope("appId", "first", SourceType::Dea, &[]))
        .await
        .unwrap();
    router
        .envelope_sender()
        .send(envelope("appId", "second", SourceType::Dea, &[]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(instrumentation.counts().dump, 1);
}

#[tokio::test]
async fn test_dump_playback_returns_snapshot_then_closes() {
    let (router, _) = started_router(100);

    for i in 0..5 {
        router
            .envelope_sender()
            .send(envelope("appId", &format!("m{i}"), SourceType::Dea, &[]))
            .await
            .unwrap();
    }
    settle().await;

    let mut playback = router.register_dump_chan("appId").await;
    let mut received = Vec::new();
    while let Some(env) = playback.recv().await {
        received.push(text(&env));
    }
    assert_eq!(received, ["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn test_dump_playback_for_unknown_app_closes_empty() {
    let (router, _) = started_router(100);

    let mut playback = router.register_dump_chan("never-seen").await;
    assert!(timeout(Duration::from_millis(100), playback.recv())
        .await
        .expect("channel should close, not hang")
        .is_none());
}

// ============================================================================
// Drain reconciliation
// ============================================================================

#[tokio::test]
async fn test_drain_reconciliation_is_idempotent() {
    let (router, instrumentation) = started_router(1024);

    for _ in 0..2 {
        router
            .envelope_sender()
            .send(envelope(
                "appId",
                "line",
                SourceType::WardenContainer,
                &["syslog://127.0.0.1:39999"],
            ))
            .await
            .unwrap();
    }
    settle().await;

    assert_eq!(instrumentation.counts().syslog, 1);
}

#[tokio::test]
async fn test_empty_drain_list_unregisters_and_closes_once() {
    let (router, instrumentation) = started_router(1024);

    // register a raw drain sink so the test holds the read end
    let (drain, mut drain_rx) =
        test_sink(SinkKind::Syslog, "appId", "syslog://h1:1", false);
    router.open_sink(drain).await;
    settle().await;
    assert_eq!(instrumentation.counts().syslog, 1);

    router
        .envelope_sender()
        .send(envelope("appId", "line", SourceType::WardenContainer, &[]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(instrumentation.counts().syslog, 0);

    // the channel closed: recv drains to None rather than blocking
    let closed = timeout(Duration::from_secs(1), async {
        while let Some(_skipped) = drain_rx.recv().await {}
    })
    .await;
    assert!(closed.is_ok(), "drain channel should be closed");
}

#[tokio::test]
async fn test_drains_not_advertised_are_dropped() {
    let (router, instrumentation) = started_router(1024);

    let (old_drain, _old_rx) = test_sink(SinkKind::Syslog, "appId", "syslog://old:1", false);
    router.open_sink(old_drain).await;
    settle().await;

    router
        .envelope_sender()
        .send(envelope(
            "appId",
            "line",
            SourceType::WardenContainer,
            &["syslog://127.0.0.1:39998"],
        ))
        .await
        .unwrap();
    settle().await;

    // the old drain is gone, the advertised one exists
    assert_eq!(instrumentation.counts().syslog, 1);
}

#[tokio::test]
async fn test_non_warden_sources_never_touch_drains() {
    let (router, instrumentation) = started_router(1024);

    router
        .envelope_sender()
        .send(envelope(
            "appId",
            "line",
            SourceType::Dea,
            &["syslog://127.0.0.1:39997"],
        ))
        .await
        .unwrap();
    settle().await;

    assert_eq!(instrumentation.counts().syslog, 0);

    // and an existing drain survives a non-warden message with no urls
    let (drain, _rx) = test_sink(SinkKind::Syslog, "appId", "syslog://h1:1", false);
    router.open_sink(drain).await;
    settle().await;

    router
        .envelope_sender()
        .send(envelope("appId", "line", SourceType::Router, &[]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(instrumentation.counts().syslog, 1);
}

#[tokio::test]
async fn test_unparseable_drain_url_is_skipped() {
    let (router, instrumentation) = started_router(1024);

    router
        .envelope_sender()
        .send(envelope(
            "appId",
            "line",
            SourceType::WardenContainer,
            &["not a url at all", "syslog://127.0.0.1:39996"],
        ))
        .await
        .unwrap();
    settle().await;

    // the bad url is skipped, the good one becomes a drain, and the
    // message still routed
    assert_eq!(instrumentation.counts().syslog, 1);
    assert_eq!(instrumentation.counts().dump, 1);
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_counters_track_register_and_unregister() {
    let (router, instrumentation) = started_router(1024);

    let (ws, _ws_rx) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    router.open_sink(ws).await;
    settle().await;
    assert_eq!(instrumentation.counts().websocket, 1);

    router
        .close_sink(SinkRef {
            kind: SinkKind::Websocket,
            app_id: "appId".into(),
            identifier: "client-1".into(),
        })
        .await;
    settle().await;
    assert_eq!(instrumentation.counts().websocket, 0);
}

#[tokio::test]
async fn test_duplicate_registration_does_not_inflate_counters() {
    let (router, instrumentation) = started_router(1024);

    let (first, _rx1) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    let (second, mut rx2) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    router.open_sink(first).await;
    router.open_sink(second).await;
    settle().await;

    assert_eq!(instrumentation.counts().websocket, 1);
    // the rejected handle was dropped by the router: its channel is closed
    assert!(rx2.recv().await.is_none());
}

#[tokio::test]
async fn test_emit_reports_gauges() {
    let (router, instrumentation) = started_router(1024);

    let (ws, _rx) = test_sink(SinkKind::Websocket, "appId", "client-1", false);
    router.open_sink(ws).await;
    router
        .envelope_sender()
        .send(envelope("appId", "line", SourceType::Dea, &[]))
        .await
        .unwrap();
    settle().await;

    use weir_metrics::{Instrumentable, MetricValue};
    let context = instrumentation.emit();
    assert_eq!(context.name, "messageRouter");
    assert_eq!(
        context.metric("numberOfDumpSinks"),
        Some(MetricValue::Gauge(1))
    );
    assert_eq!(
        context.metric("numberOfWebsocketSinks"),
        Some(MetricValue::Gauge(1))
    );
    assert_eq!(
        context.metric("numberOfSyslogSinks"),
        Some(MetricValue::Gauge(0))
    );
}
