use std::{
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use async_trait::async_trait;
use log::debug;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use thiserror::Error;

use crate::deadline::{self, DeadlineError};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Deadline(#[from] DeadlineError),
    #[error("probe task failed: {0}")]
    Task(String),
}

/// Fetches the DER certificate a host presents on a port.
#[async_trait]
pub trait CertificateProbe: Send + Sync {
    async fn peer_certificate(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ProbeError>;
}

/// Live probe over OpenSSL. Peer verification is disabled so that self-signed
/// and staging certificates can still be inspected.
#[derive(Debug, Default, Clone)]
pub struct OpenSslProbe;

impl OpenSslProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CertificateProbe for OpenSslProbe {
    async fn peer_certificate(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ProbeError> {
        let host = host.to_string();
        // Connect, write and read are each bounded by `timeout`; the outer
        // budget covers resolution plus the whole handshake.
        let task = tokio::task::spawn_blocking(move || fetch_blocking(&host, port, timeout));
        match deadline::race("tls probe", timeout * 3, task).await? {
            Ok(result) => result,
            Err(err) => Err(ProbeError::Task(err.to_string())),
        }
    }
}

fn fetch_blocking(host: &str, port: u16, timeout: Duration) -> Result<Option<Vec<u8>>, ProbeError> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ProbeError::Resolve(format!("{host}:{port}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(ProbeError::Resolve(format!("{host}:{port}")));
    }

    let mut last_err = None;
    let mut stream = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(connected) => {
                stream = Some(connected);
                break;
            }
            Err(err) => {
                debug!("[inspect] connect to {} failed: {}", addr, err);
                last_err = Some(err);
            }
        }
    }
    let stream = match (stream, last_err) {
        (Some(stream), _) => stream,
        (None, Some(err)) => return Err(ProbeError::Io(err)),
        (None, None) => return Err(ProbeError::Resolve(format!("{host}:{port}"))),
    };
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut builder = SslConnector::builder(SslMethod::tls())?;
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();
    let mut configuration = connector.configure()?;
    configuration.set_verify_hostname(false);

    let tls = configuration
        .connect(host, stream)
        .map_err(|e| ProbeError::Handshake(e.to_string()))?;

    match tls.ssl().peer_certificate() {
        Some(cert) => Ok(Some(cert.to_der()?)),
        None => Ok(None),
    }
}
