//! Message router event loop
//!
//! One task owns the sink registry and services five channels with equal
//! priority: dump-playback requests, sink open/close, error envelopes, and
//! primary envelopes. For every primary envelope it reconciles syslog
//! drains against the message's URL list (warden containers only), lazily
//! creates the app's dump sink, and fans the envelope out with blocking
//! sends. Slow sinks therefore stall routing; sink channels must be sized
//! for their consumers.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use url::Url;
use weir_metrics::{Context, Instrumentable, Metric};
use weir_protocol::{Envelope, SourceType};
use weir_sinks::{DumpBuffer, DumpSink, SinkHandle, SinkKind, SinkRef, SyslogSink, SyslogWriter};

use crate::grouped::GroupedSinks;

/// Most recent envelopes replayed to a newly connected subscriber,
/// independent of the dump buffer capacity
pub const NEW_SUBSCRIBER_REPLAY_LIMIT: usize = 20;

const ENVELOPE_CHANNEL_SIZE: usize = 2048;
const SINK_CONTROL_CHANNEL_SIZE: usize = 20;
const ERROR_CHANNEL_SIZE: usize = 10;

/// Dump-playback request: snapshot the app's dump sink into `output`
#[derive(Debug)]
pub struct DumpRequest {
    pub app_id: String,
    pub output: mpsc::Sender<Arc<Envelope>>,
}

/// Active sink gauges, split per kind
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkCounts {
    pub dump: usize,
    pub syslog: usize,
    pub websocket: usize,
}

impl SinkCounts {
    fn increment(&mut self, kind: SinkKind) {
        match kind {
            SinkKind::Dump => self.dump += 1,
            SinkKind::Syslog => self.syslog += 1,
            SinkKind::Websocket => self.websocket += 1,
        }
    }

    fn decrement(&mut self, kind: SinkKind) {
        match kind {
            SinkKind::Dump => self.dump = self.dump.saturating_sub(1),
            SinkKind::Syslog => self.syslog = self.syslog.saturating_sub(1),
            SinkKind::Websocket => self.websocket = self.websocket.saturating_sub(1),
        }
    }
}

/// The router task
pub struct MessageRouter {
    dump_buffer_size: usize,
    skip_cert_verify: bool,

    envelope_rx: mpsc::Receiver<Arc<Envelope>>,
    error_rx: mpsc::Receiver<Arc<Envelope>>,
    sink_open_rx: mpsc::Receiver<SinkHandle>,
    sink_close_rx: mpsc::Receiver<SinkRef>,
    dump_request_rx: mpsc::Receiver<DumpRequest>,

    handle: RouterHandle,
    counters: Arc<RwLock<SinkCounts>>,
}

/// Cloneable write surface of a running router
#[derive(Clone)]
pub struct RouterHandle {
    envelopes: mpsc::Sender<Arc<Envelope>>,
    errors: mpsc::Sender<Arc<Envelope>>,
    sink_open: mpsc::Sender<SinkHandle>,
    sink_close: mpsc::Sender<SinkRef>,
    dump_requests: mpsc::Sender<DumpRequest>,
    dump_buffer_size: usize,
}

impl RouterHandle {
    /// Sender feeding primary envelopes into the router (the ingress side)
    pub fn envelope_sender(&self) -> mpsc::Sender<Arc<Envelope>> {
        self.envelopes.clone()
    }

    /// Sender for synthetic error envelopes
    pub fn error_sender(&self) -> mpsc::Sender<Arc<Envelope>> {
        self.errors.clone()
    }

    /// Register a sink. Returns `false` if the router is gone.
    pub async fn open_sink(&self, handle: SinkHandle) -> bool {
        self.sink_open.send(handle).await.is_ok()
    }

    /// Unregister a sink by identity
    pub async fn close_sink(&self, sink: SinkRef) -> bool {
        self.sink_close.send(sink).await.is_ok()
    }

    /// Request a dump playback for `app_id`.
    ///
    /// The returned channel is buffered to the dump capacity, so the
    /// router's blocking sends cannot deadlock on a well-behaved caller.
    /// It yields the snapshot and then closes; for an app with no dump
    /// sink it closes empty.
    pub async fn register_dump_chan(&self, app_id: &str) -> mpsc::Receiver<Arc<Envelope>> {
        let (output, receiver) = mpsc::channel(self.dump_buffer_size);
        let request = DumpRequest {
            app_id: app_id.to_owned(),
            output,
        };
        if self.dump_requests.send(request).await.is_err() {
            tracing::debug!(app_id = %app_id, "dump request channel closed");
        }
        receiver
    }
}

/// Read-only metrics surface; stays valid after `run()` consumes the router
#[derive(Clone)]
pub struct RouterInstrumentation {
    counters: Arc<RwLock<SinkCounts>>,
}

impl RouterInstrumentation {
    /// Current per-kind sink counts
    pub fn counts(&self) -> SinkCounts {
        *self.counters.read()
    }
}

impl Instrumentable for RouterInstrumentation {
    fn emit(&self) -> Context {
        let counts = self.counts();
        Context::with_metrics(
            "messageRouter",
            vec![
                Metric::gauge("numberOfDumpSinks", counts.dump as i64),
                Metric::gauge("numberOfSyslogSinks", counts.syslog as i64),
                Metric::gauge("numberOfWebsocketSinks", counts.websocket as i64),
            ],
        )
    }
}

impl MessageRouter {
    /// Create a router.
    ///
    /// `dump_buffer_size` is the per-app dump capacity; `skip_cert_verify`
    /// is the process-wide policy applied to every syslog-tls drain writer.
    pub fn new(dump_buffer_size: usize, skip_cert_verify: bool) -> Self {
        let (envelope_tx, envelope_rx) = mpsc::channel(ENVELOPE_CHANNEL_SIZE);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_SIZE);
        let (sink_open_tx, sink_open_rx) = mpsc::channel(SINK_CONTROL_CHANNEL_SIZE);
        let (sink_close_tx, sink_close_rx) = mpsc::channel(SINK_CONTROL_CHANNEL_SIZE);
        let (dump_request_tx, dump_request_rx) = mpsc::channel(1);

        Self {
            dump_buffer_size,
            skip_cert_verify,
            envelope_rx,
            error_rx,
            sink_open_rx,
            sink_close_rx,
            dump_request_rx,
            handle: RouterHandle {
                envelopes: envelope_tx,
                errors: error_tx,
                sink_open: sink_open_tx,
                sink_close: sink_close_tx,
                dump_requests: dump_request_tx,
                dump_buffer_size,
            },
            counters: Arc::new(RwLock::new(SinkCounts::default())),
        }
    }

    /// The router's write surface
    pub fn handle(&self) -> RouterHandle {
        self.handle.clone()
    }

    /// The router's metrics surface
    pub fn instrumentation(&self) -> RouterInstrumentation {
        RouterInstrumentation {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Run the event loop. The registry lives and dies with this task;
    /// there is no shutdown surface - the router runs for the life of the
    /// process.
    pub async fn run(mut self) {
        tracing::info!(
            dump_buffer_size = self.dump_buffer_size,
            skip_cert_verify = self.skip_cert_verify,
            "message router starting"
        );

        let mut sinks = GroupedSinks::new();

        loop {
            tokio::select! {
                Some(request) = self.dump_request_rx.recv() => {
                    self.playback_dump(request, &sinks).await;
                }
                Some(handle) = self.sink_open_rx.recv() => {
                    self.register_sink(handle, &mut sinks);
                }
                Some(sink) = self.sink_close_rx.recv() => {
                    self.unregister_sink(&sink, &mut sinks);
                }
                Some(envelope) = self.error_rx.recv() => {
                    self.route_error(envelope, &sinks).await;
                }
                Some(envelope) = self.envelope_rx.recv() => {
                    self.route_envelope(envelope, &mut sinks).await;
                }
                else => break,
            }
        }

        tracing::info!("message router stopped");
    }

    /// Snapshot the app's dump sink into the caller's channel, then close
    /// it by dropping the sender. An app without a dump sink yields an
    /// empty playback.
    async fn playback_dump(&self, request: DumpRequest, sinks: &GroupedSinks) {
        let DumpRequest { app_id, output } = request;
        let Some(buffer) = sinks.dump_for(&app_id) else {
            return;
        };
        for envelope in buffer.snapshot() {
            if output.send(envelope).await.is_err() {
                tracing::debug!(app_id = %app_id, "dump receiver went away mid playback");
                return;
            }
        }
    }

    /// Insert a sink into the registry and bump its kind's counter. A
    /// websocket registration schedules the one-shot replay task. Returns
    /// whether insertion happened.
    fn register_sink(&self, handle: SinkHandle, sinks: &mut GroupedSinks) -> bool {
        let kind = handle.kind();
        let app_id = handle.app_id().to_owned();
        let identifier = handle.identifier().to_owned();

        // capture before the registry takes ownership of the handle
        let replay = (kind == SinkKind::Websocket)
            .then(|| (sinks.dump_for(&app_id), handle.sender()));

        let registered = {
            let mut counters = self.counters.write();
            let registered = sinks.register(handle);
            if registered {
                counters.increment(kind);
            }
            registered
        };

        if !registered {
            tracing::debug!(
                app_id = %app_id,
                identifier = %identifier,
                kind = kind.as_str(),
                "sink already registered"
            );
            return false;
        }

        if let Some((buffer, sender)) = replay {
            tokio::spawn(dump_to_sink(buffer, sender));
        }

        tracing::info!(
            app_id = %app_id,
            identifier = %identifier,
            kind = kind.as_str(),
            "sink registered"
        );
        true
    }

    /// Remove a sink from the registry. Dropping the removed handle closes
    /// the sink's channel; registration and unregistration pair one to one,
    /// so the close happens exactly once.
    fn unregister_sink(&self, sink: &SinkRef, sinks: &mut GroupedSinks) {
        let removed = {
            let mut counters = self.counters.write();
            let removed = sinks.delete(sink);
            if removed.is_some() {
                counters.decrement(sink.kind);
            }
            removed
        };

        if removed.is_some() {
            tracing::info!(
                app_id = %sink.app_id,
                identifier = %sink.identifier,
                kind = sink.kind.as_str(),
                "sink unregistered"
            );
        }
    }

    /// Deliver an error envelope to the sinks of its app that opted in
    async fn route_error(&self, envelope: Arc<Envelope>, sinks: &GroupedSinks) {
        for handle in sinks.for_app(envelope.app_id()) {
            if !handle.should_receive_errors() {
                continue;
            }
            if handle.send(Arc::clone(&envelope)).await.is_err() {
                tracing::debug!(
                    identifier = %handle.identifier(),
                    "error envelope to a dead sink"
                );
            }
        }
    }

    /// Route one primary envelope: reconcile drains, ensure the dump sink,
    /// fan out
    async fn route_envelope(&self, envelope: Arc<Envelope>, sinks: &mut GroupedSinks) {
        tracing::trace!(
            app_id = %envelope.app_id(),
            bytes = envelope.raw_message_length(),
            "routing envelope"
        );

        if envelope.source_type() == SourceType::WardenContainer {
            self.manage_drains(envelope.app_id(), envelope.drain_urls(), sinks);
        }
        self.manage_dumps(envelope.app_id(), sinks);

        for handle in sinks.for_app(envelope.app_id()) {
            if handle.send(Arc::clone(&envelope)).await.is_err() {
                tracing::debug!(
                    identifier = %handle.identifier(),
                    "envelope to a dead sink"
                );
            }
        }
    }

    /// Make the app's live drains equal the URL set on the message
    fn manage_drains(&self, app_id: &str, drain_urls: &[String], sinks: &mut GroupedSinks) {
        if drain_urls.is_empty() {
            for identifier in sinks.drain_identifiers(app_id) {
                self.unregister_sink(
                    &SinkRef {
                        kind: SinkKind::Syslog,
                        app_id: app_id.to_owned(),
                        identifier,
                    },
                    sinks,
                );
            }
            return;
        }

        // drop drains the message no longer advertises
        let stale: Vec<String> = sinks
            .drain_identifiers(app_id)
            .into_iter()
            .filter(|identifier| !drain_urls.iter().any(|url| url == identifier))
            .collect();
        for identifier in stale {
            self.unregister_sink(
                &SinkRef {
                    kind: SinkKind::Syslog,
                    app_id: app_id.to_owned(),
                    identifier,
                },
                sinks,
            );
        }

        // start drains that appeared
        for drain_url in drain_urls {
            if sinks.drain_for(app_id, drain_url).is_some() {
                continue;
            }

            let parsed = match Url::parse(drain_url) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(url = %drain_url, error = %err, "skipping unparseable drain url");
                    continue;
                }
            };
            let writer = match SyslogWriter::from_url(&parsed, app_id, self.skip_cert_verify) {
                Ok(writer) => writer,
                Err(err) => {
                    tracing::warn!(url = %drain_url, error = %err, "skipping unusable drain url");
                    continue;
                }
            };

            let (sink, handle) =
                SyslogSink::new(app_id, drain_url.clone(), writer, self.handle.error_sender());
            if self.register_sink(handle, sinks) {
                tokio::spawn(sink.run());
            }
        }
    }

    /// Lazily create the app's dump sink
    fn manage_dumps(&self, app_id: &str, sinks: &mut GroupedSinks) {
        if sinks.dump_for(app_id).is_some() {
            return;
        }
        let (sink, handle) = DumpSink::new(app_id, self.dump_buffer_size);
        if self.register_sink(handle, sinks) {
            tokio::spawn(sink.run());
        }
    }
}

/// One-shot replay of the app's recent envelopes to a new subscriber.
/// Runs off the router task; no registry access, no locks.
async fn dump_to_sink(buffer: Option<Arc<DumpBuffer>>, sender: mpsc::Sender<Arc<Envelope>>) {
    let Some(buffer) = buffer else {
        return;
    };
    for envelope in buffer.last_n(NEW_SUBSCRIBER_REPLAY_LIMIT) {
        if sender.send(envelope).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
