//! Weir Configuration
//!
//! TOML-based configuration loading with sensible defaults. A minimal
//! config only needs the bits that differ from the defaults:
//!
//! ```toml
//! [ingress]
//! address = "0.0.0.0:3456"
//!
//! [router]
//! max_retained_log_messages = 100
//! ```
//!
//! TLS is enabled by adding an `[ingress.tls]` table; when `ca_file` is set
//! the listener requires and verifies client certificates against it.

mod error;
mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Framed TCP ingress
    pub ingress: IngressConfig,

    /// Message router
    pub router: RouterConfig,

    /// Logging
    pub log: LogConfig,
}

/// Framed TCP ingress configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Bind address. Default: "0.0.0.0:3456"
    pub address: String,

    /// Prefix for the listener's counter names. Default: "listeners.tcp"
    pub context_name: String,

    /// Mutual-TLS settings; absent means plaintext TCP
    pub tls: Option<TlsListenerConfig>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:3456".into(),
            context_name: "listeners.tcp".into(),
            tls: None,
        }
    }
}

/// TLS listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct TlsListenerConfig {
    /// PEM server certificate chain
    pub cert_file: PathBuf,

    /// PEM private key
    pub key_file: PathBuf,

    /// PEM CA bundle; when present it is both the trust root set and the
    /// set of acceptable client-certificate issuers
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

/// Message router configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-app dump buffer capacity. Default: 100
    pub max_retained_log_messages: usize,

    /// Disable server certificate verification on syslog-tls drains.
    /// Default: false
    pub skip_cert_verify: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retained_log_messages: 100,
            skip_cert_verify: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&contents)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.ingress.address.is_empty() {
            return Err(ConfigError::invalid_value(
                "ingress",
                "address",
                "must not be empty",
            ));
        }
        if self.ingress.context_name.is_empty() {
            return Err(ConfigError::invalid_value(
                "ingress",
                "context_name",
                "must not be empty",
            ));
        }
        if self.router.max_retained_log_messages == 0 {
            return Err(ConfigError::invalid_value(
                "router",
                "max_retained_log_messages",
                "must be at least 1",
            ));
        }
        if let Some(tls) = &self.ingress.tls {
            if tls.cert_file.as_os_str().is_empty() {
                return Err(ConfigError::invalid_value(
                    "ingress.tls",
                    "cert_file",
                    "must not be empty",
                ));
            }
            if tls.key_file.as_os_str().is_empty() {
                return Err(ConfigError::invalid_value(
                    "ingress.tls",
                    "key_file",
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
