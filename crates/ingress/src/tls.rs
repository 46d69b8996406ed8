//! Listener TLS configuration
//!
//! Builds the server-side rustls configuration: the loaded keypair as the
//! server identity, TLS 1.2 as the floor, and - when a CA bundle is
//! supplied - that bundle as both the trust roots and the set of acceptable
//! client-certificate issuers, with client authentication required and
//! verified.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use crate::error::TlsConfigError;

/// Assemble the listener's TLS configuration.
///
/// Without a CA bundle there is no anchor to verify client certificates
/// against, so client authentication is only enforced when `ca_file` is
/// present.
pub fn build_server_config(
    cert_file: &Path,
    key_file: &Path,
    ca_file: Option<&Path>,
) -> Result<ServerConfig, TlsConfigError> {
    let (certs, key) = load_keypair(cert_file, key_file)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?;

    let config = match ca_file {
        Some(path) => {
            let roots = load_ca_bundle(path)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|err| TlsConfigError::ClientVerifier(err.to_string()))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|err| keypair_error(cert_file, key_file, err))?
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| keypair_error(cert_file, key_file, err))?,
    };

    Ok(config)
}

fn load_keypair(
    cert_file: &Path,
    key_file: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsConfigError> {
    let file = File::open(cert_file)
        .map_err(|err| keypair_error(cert_file, key_file, err))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|err| keypair_error(cert_file, key_file, err))?;
    if certs.is_empty() {
        return Err(keypair_error(
            cert_file,
            key_file,
            "no certificates found in cert file",
        ));
    }

    let file = File::open(key_file)
        .map_err(|err| keypair_error(cert_file, key_file, err))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|err| keypair_error(cert_file, key_file, err))?
        .ok_or_else(|| keypair_error(cert_file, key_file, "no private key found in key file"))?;

    Ok((certs, key))
}

fn load_ca_bundle(path: &Path) -> Result<RootCertStore, TlsConfigError> {
    let file = File::open(path).map_err(|source| TlsConfigError::CaRead {
        path: path.display().to_string(),
        source,
    })?;

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
        let cert = cert.map_err(|source| TlsConfigError::CaRead {
            path: path.display().to_string(),
            source,
        })?;
        if let Err(err) = roots.add(cert) {
            tracing::debug!(path = %path.display(), error = %err, "skipping unusable ca certificate");
        }
    }

    if roots.is_empty() {
        return Err(TlsConfigError::EmptyCaBundle {
            path: path.display().to_string(),
        });
    }
    Ok(roots)
}

fn keypair_error(
    cert_file: &Path,
    key_file: &Path,
    message: impl ToString,
) -> TlsConfigError {
    TlsConfigError::Keypair {
        cert: cert_file.display().to_string(),
        key: key_file.display().to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
#[path = "tls_test.rs"]
mod tests;
