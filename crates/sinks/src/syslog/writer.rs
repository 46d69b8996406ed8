//! Syslog drain writer
//!
//! A `SyslogWriter` turns envelopes into RFC 5424 lines with octet-counting
//! framing and ships them to one drain. The drain URL's scheme selects the
//! transport: `syslog://` is plain TCP, `syslog-tls://` is TLS. Connections
//! are established lazily and discarded on the first write error; the next
//! write reconnects.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use rustls::pki_types::ServerName;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use weir_protocol::{Envelope, MessageKind};

use crate::error::SinkError;

/// Port assumed when the drain URL does not name one
const DEFAULT_SYSLOG_PORT: u16 = 514;

enum Transport {
    Tcp,
    Tls {
        connector: TlsConnector,
        server_name: ServerName<'static>,
    },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("Tcp"),
            Self::Tls { server_name, .. } => {
                f.debug_struct("Tls").field("server_name", server_name).finish()
            }
        }
    }
}

#[derive(Debug)]
enum Connection {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.write_all(buf).await,
            Self::Tls(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await
            }
        }
    }
}

/// Writer for one syslog drain
#[derive(Debug)]
pub struct SyslogWriter {
    host: String,
    port: u16,
    app_id: String,
    transport: Transport,
    connection: Option<Connection>,
}

impl SyslogWriter {
    /// Build a writer from a drain URL's scheme and host.
    ///
    /// `skip_cert_verify` disables server certificate verification for
    /// `syslog-tls` drains (process-wide operator policy).
    pub fn new(
        scheme: &str,
        host: &str,
        port: u16,
        app_id: &str,
        skip_cert_verify: bool,
    ) -> Result<Self, SinkError> {
        let transport = match scheme {
            "syslog" => Transport::Tcp,
            "syslog-tls" => {
                let config = tls_client_config(skip_cert_verify)?;
                let server_name = ServerName::try_from(host.to_owned()).map_err(|err| {
                    SinkError::InvalidServerName {
                        name: host.to_owned(),
                        message: err.to_string(),
                    }
                })?;
                Transport::Tls {
                    connector: TlsConnector::from(Arc::new(config)),
                    server_name,
                }
            }
            other => return Err(SinkError::UnsupportedScheme(other.to_owned())),
        };

        Ok(Self {
            host: host.to_owned(),
            port,
            app_id: app_id.to_owned(),
            transport,
            connection: None,
        })
    }

    /// Build a writer from a parsed drain URL
    pub fn from_url(
        url: &url::Url,
        app_id: &str,
        skip_cert_verify: bool,
    ) -> Result<Self, SinkError> {
        let host = url
            .host_str()
            .ok_or_else(|| SinkError::MissingHost(url.to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_SYSLOG_PORT);
        Self::new(url.scheme(), host, port, app_id, skip_cert_verify)
    }

    /// `host:port` of the drain
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a connection is currently held
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Drop the current connection; the next write reconnects
    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    /// Write one envelope, connecting first if necessary.
    ///
    /// Returns the number of bytes put on the wire. Any error invalidates
    /// the connection.
    pub async fn write_envelope(&mut self, envelope: &Envelope) -> Result<usize, SinkError> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.connect().await?,
        };

        let line = format_rfc5424(&self.app_id, envelope);
        let frame = format!("{} {}", line.len(), line);

        match connection.write_all(frame.as_bytes()).await {
            Ok(()) => {
                self.connection = Some(connection);
                Ok(frame.len())
            }
            Err(source) => Err(SinkError::Write {
                target: self.target(),
                source,
            }),
        }
    }

    async fn connect(&self) -> Result<Connection, SinkError> {
        let target = self.target();
        let stream = TcpStream::connect(&target)
            .await
            .map_err(|source| SinkError::Connect {
                target: target.clone(),
                source,
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(target = %target, error = %err, "failed to set TCP_NODELAY");
        }

        match &self.transport {
            Transport::Tcp => Ok(Connection::Tcp(stream)),
            Transport::Tls {
                connector,
                server_name,
            } => {
                let tls_stream = connector
                    .connect(server_name.clone(), stream)
                    .await
                    .map_err(|source| SinkError::TlsHandshake { target, source })?;
                Ok(Connection::Tls(Box::new(tls_stream)))
            }
        }
    }
}

/// Format an envelope as one RFC 5424 line.
///
/// stdout lines carry priority 14 (user.info), stderr lines 11 (user.err).
pub fn format_rfc5424(app_id: &str, envelope: &Envelope) -> String {
    let log = envelope.log_message();
    let priority = match log.kind {
        MessageKind::Out => 14,
        MessageKind::Err => 11,
    };
    let timestamp = DateTime::from_timestamp_nanos(log.timestamp)
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    let body = String::from_utf8_lossy(&log.message);
    format!("<{priority}>1 {timestamp} - {app_id} weir - - {body}\n")
}

fn tls_client_config(skip_cert_verify: bool) -> Result<rustls::ClientConfig, SinkError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|err| SinkError::TlsConfig(err.to_string()))?;

    if skip_cert_verify {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerification::new(provider)))
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        if let Err(err) = roots.add(cert) {
            tracing::debug!(error = %err, "skipping unusable native root certificate");
        }
    }
    if roots.is_empty() {
        return Err(SinkError::TlsConfig(
            "no usable certificates in the native root store".into(),
        ));
    }

    Ok(builder
        .with_root_certificates(roots)
        .with_no_client_auth())
}

mod danger {
    //! Certificate verifier that accepts anything, gated behind the
    //! operator's `skip_cert_verify` flag.

    use std::sync::Arc;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub(super) struct NoVerification {
        provider: Arc<CryptoProvider>,
    }

    impl NoVerification {
        pub(super) fn new(provider: Arc<CryptoProvider>) -> Self {
            Self { provider }
        }
    }

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
