//! TLS client configuration
//!
//! Configuration is plain data; the OpenSSL connector is built on the I/O
//! thread right before the handshake so a bad setting surfaces as a
//! connection error instead of a construction failure.

use super::{Error, Result};
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

/// TLS client configuration (immutable after building)
#[derive(Debug, Clone)]
pub struct TlsConfig {
    verify_peer: bool,
    ca_file: Option<PathBuf>,
    servername: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            verify_peer: true,
            ca_file: None,
            servername: None,
        }
    }
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> TlsConfigBuilder {
        TlsConfigBuilder {
            config: TlsConfig::default(),
        }
    }

    /// Is the server certificate verified?
    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    /// Build the OpenSSL connector for this configuration
    pub fn connector(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        if let Some(ref ca_file) = self.ca_file {
            builder.set_ca_file(ca_file)?;
        }

        if !self.verify_peer {
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(builder.build())
    }

    /// Run the client handshake over an established TCP stream
    pub(crate) fn handshake(&self, host: &str, stream: TcpStream) -> Result<SslStream<TcpStream>> {
        let connector = self.connector()?;
        let mut ssl = connector.configure()?;

        if !self.verify_peer {
            ssl.set_verify_hostname(false);
        }

        let servername = self.servername.as_deref().unwrap_or(host);

        ssl.connect(servername, stream)
            .map_err(|e| Error::Tls(format!("Handshake failed: {}", e)))
    }
}

/// Builder for [`TlsConfig`]
#[derive(Debug)]
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl TlsConfigBuilder {
    /// Verify the server certificate and hostname (default: true)
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.config.verify_peer = verify;
        self
    }

    /// Trust anchors to verify the server against
    pub fn ca_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config.ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// SNI name, defaults to the host passed to connect
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.config.servername = Some(name.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> TlsConfig {
        self.config
    }
}
