use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::protocol::error::{NodepoolError, Result};
use crate::transport::tcp::TcpTransport;
use crate::transport::{BoxedStream, ConnectFuture, Transport};

/// TLS client settings.
///
/// Ledger nodes commonly present self-signed certificates, so certificate
/// validation can be relaxed with `accept_invalid_certs`. Otherwise the
/// server is checked against `ca_cert_path` when given, or the bundled
/// web PKI roots.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM file with CA certificates to trust instead of the web PKI roots
    pub ca_cert_path: Option<PathBuf>,
    /// Skip server certificate verification entirely
    pub accept_invalid_certs: bool,
    /// Name sent for SNI and checked against the certificate; defaults to the host
    pub server_name: Option<String>,
}

impl TlsOptions {
    /// Options that accept any server certificate
    pub fn permissive() -> Self {
        Self {
            accept_invalid_certs: true,
            ..Self::default()
        }
    }
}

/// TLS transport over TCP.
pub struct TlsTransport {
    tcp: TcpTransport,
    connector: TlsConnector,
    server_name: Option<String>,
}

impl TlsTransport {
    /// Builds the TLS client configuration from `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA file cannot be read or contains no usable
    /// certificate.
    pub fn new(options: TlsOptions) -> Result<Self> {
        // Install default crypto provider for rustls (ring backend)
        rustls::crypto::ring::default_provider().install_default().ok();

        let config = if options.accept_invalid_certs {
            warn!("TLS certificate verification disabled");
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipServerVerification::new())
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .with_root_certificates(Self::root_store(&options)?)
                .with_no_client_auth()
        };

        Ok(Self {
            tcp: TcpTransport::new(),
            connector: TlsConnector::from(Arc::new(config)),
            server_name: options.server_name,
        })
    }

    fn root_store(options: &TlsOptions) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();

        if let Some(ref ca_path) = options.ca_cert_path {
            let ca_file = File::open(ca_path).map_err(|e| {
                NodepoolError::Transport(format!("{}: {}", ca_path.display(), e))
            })?;
            let mut ca_reader = BufReader::new(ca_file);
            let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut ca_reader)
                .filter_map(|r| r.ok())
                .collect();

            if certs.is_empty() {
                return Err(NodepoolError::Transport(format!(
                    "no certificates found in {}",
                    ca_path.display()
                )));
            }

            for cert in certs {
                root_store
                    .add(cert)
                    .map_err(|e| NodepoolError::Transport(format!("Failed to add CA: {}", e)))?;
            }
        } else {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        Ok(root_store)
    }
}

impl Transport for TlsTransport {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> ConnectFuture<'a> {
        Box::pin(async move {
            let name = self.server_name.as_deref().unwrap_or(host).to_string();
            let server_name = ServerName::try_from(name)
                .map_err(|e| NodepoolError::InvalidAddress(format!("{}: {}", host, e)))?;

            let tcp = self.tcp.connect_tcp(host, port).await?;
            let stream = self
                .connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| NodepoolError::Transport(format!("TLS handshake with {}:{}: {}", host, port, e)))?;

            debug!(host, port, "tls session established");
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Accepts any server certificate.
#[derive(Debug)]
struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
