use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;
use vos_cert_engine::{
    config::Environment,
    inspect::{CertificateProbe, LocalCertificateStore, ProbeError},
};

pub fn create_temp_dir(prefix: &str) -> Result<PathBuf> {
    let mut path = std::env::temp_dir();
    path.push(format!("{prefix}_{}", Uuid::new_v4().as_simple()));
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Self-signed certificate for `names`, as PEM.
pub fn self_signed_pem(names: &[&str]) -> Result<String> {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let certified = rcgen::generate_simple_self_signed(names)?;
    Ok(certified.cert.pem())
}

/// Writes `pem` where the inspector's local fallback looks for `hostname`.
pub fn store_certificate(root: &Path, hostname: &str, environment: Environment, pem: &str) -> Result<PathBuf> {
    let path = LocalCertificateStore::new(root)
        .path_for(hostname, environment)
        .context("hostname is not a valid store directory")?;
    let parent = path.parent().context("certificate path has no parent")?;
    fs::create_dir_all(parent)?;
    fs::write(&path, pem)?;
    Ok(path)
}

/// A host that never completes a TLS handshake.
pub struct UnreachableProbe;

#[async_trait]
impl CertificateProbe for UnreachableProbe {
    async fn peer_certificate(
        &self,
        host: &str,
        _port: u16,
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ProbeError> {
        Err(ProbeError::Resolve(host.to_string()))
    }
}
