//! TCP listener
//!
//! Owns the accept loop and the set of live connections. Each accepted
//! connection gets its own reader task; the reader removes itself from the
//! set exactly once, when it exits. `stop()` cancels the shared shutdown
//! token - which unblocks every reader's reads and envelope publishes - and
//! waits for the accept loop to acknowledge.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use weir_metrics::{Context, Instrumentable};
use weir_protocol::{Envelope, Unmarshaller};

use crate::error::IngressError;
use crate::metrics::IngressMetrics;
use crate::reader;

/// Framed TCP ingress listener
pub struct IngressListener {
    state: Mutex<ListenerState>,
    metrics: Arc<IngressMetrics>,
    envelope_tx: mpsc::Sender<Arc<Envelope>>,
    unmarshaller: Arc<dyn Unmarshaller>,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
    closed: CancellationToken,
}

struct ListenerState {
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    connections: HashMap<u64, SocketAddr>,
    next_connection_id: u64,
    started: bool,
    stopped: bool,
}

impl IngressListener {
    /// Bind the listening socket.
    ///
    /// Counter names are formed from `context_name` here and never change.
    /// When `tls` is supplied every connection must complete a handshake
    /// before its first record.
    pub async fn new(
        context_name: &str,
        address: &str,
        tls: Option<rustls::ServerConfig>,
        unmarshaller: Arc<dyn Unmarshaller>,
        envelope_tx: mpsc::Sender<Arc<Envelope>>,
    ) -> Result<Self, IngressError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| IngressError::Bind {
                address: address.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            state: Mutex::new(ListenerState {
                listener: Some(listener),
                local_addr: Some(local_addr),
                connections: HashMap::new(),
                next_connection_id: 0,
                started: false,
                stopped: false,
            }),
            metrics: Arc::new(IngressMetrics::new(context_name)),
            envelope_tx,
            unmarshaller,
            tls: tls.map(|config| TlsAcceptor::from(Arc::new(config))),
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
        })
    }

    /// The bound address as text, or empty after `stop()`
    pub fn address(&self) -> String {
        self.state
            .lock()
            .local_addr
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }

    /// Listener counters
    pub fn metrics(&self) -> Arc<IngressMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of live connections (test/diagnostic surface)
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Run the accept loop until `stop()` or an accept error.
    ///
    /// # Panics
    ///
    /// Panics when called a second time - that is a programming error.
    pub async fn start(self: Arc<Self>) {
        let listener = {
            let mut state = self.state.lock();
            if state.started {
                drop(state);
                panic!("IngressListener has already been started");
            }
            state.started = true;
            state.listener.take()
        };

        // stop() won the race before start: nothing to accept from
        let Some(listener) = listener else {
            self.closed.cancel();
            return;
        };

        tracing::info!(address = %self.address(), "tcp listener accepting connections");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_reader(stream, peer),
                    Err(err) => {
                        tracing::debug!(error = %err, "accept failed, listener shutting down");
                        break;
                    }
                }
            }
        }

        self.closed.cancel();
        tracing::info!("tcp listener stopped");
    }

    /// Shut the listener down and wait for the accept loop to exit.
    /// Idempotent; calls after the first return immediately.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.local_addr = None;
            // accept loop never ran: acknowledge closure ourselves
            if state.listener.take().is_some() {
                self.closed.cancel();
            }
        }

        self.shutdown.cancel();
        self.closed.cancelled().await;
    }

    fn spawn_reader(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        configure_socket(&stream);

        let connection_id = {
            let mut state = self.state.lock();
            let id = state.next_connection_id;
            state.next_connection_id += 1;
            state.connections.insert(id, peer);
            id
        };

        let listener = Arc::clone(self);
        tokio::spawn(async move {
            listener.handle_connection(stream, peer).await;
            // removal happens exactly once, on reader exit
            listener.state.lock().connections.remove(&connection_id);
        });
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        match &self.tls {
            Some(acceptor) => {
                let handshake = tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    result = acceptor.accept(stream) => result,
                };
                match handshake {
                    Ok(mut tls_stream) => self.read_connection(&mut tls_stream, peer).await,
                    Err(err) => {
                        self.metrics.receive_error();
                        tracing::warn!(peer = %peer, error = %err, "tls handshake error");
                    }
                }
            }
            None => {
                let mut stream = stream;
                self.read_connection(&mut stream, peer).await;
            }
        }
    }

    async fn read_connection<S>(&self, stream: &mut S, peer: SocketAddr)
    where
        S: AsyncRead + Unpin,
    {
        // shutdown aborts reads as well as publishes; the socket drops on
        // return
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = reader::read_records(
                stream,
                peer,
                self.unmarshaller.as_ref(),
                &self.envelope_tx,
                &self.shutdown,
                &self.metrics,
            ) => {}
        }
    }
}

impl Instrumentable for IngressListener {
    fn emit(&self) -> Context {
        self.metrics.emit()
    }
}

/// Best-effort socket tuning on accepted connections
fn configure_socket(stream: &TcpStream) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(error = %err, "failed to set TCP_NODELAY");
    }

    let socket = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    if let Err(err) = socket.set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %err, "failed to set TCP keepalive");
    }
}

#[cfg(test)]
#[path = "listener_test.rs"]
mod tests;
