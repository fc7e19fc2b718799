use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::{config::Environment, domain::normalize_hostname};

const CERTIFICATE_FILE: &str = "certificate.pem";

/// Read-only view of `<root>/<hostname>/<staging|prod>/certificate.pem`.
#[derive(Debug, Clone)]
pub struct LocalCertificateStore {
    root: PathBuf,
}

impl LocalCertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `None` when `hostname` cannot name a directory directly under the root.
    pub fn path_for(&self, hostname: &str, environment: Environment) -> Option<PathBuf> {
        match normalize_hostname(hostname) {
            Ok(host) => Some(
                self.root
                    .join(host)
                    .join(environment.store_dir())
                    .join(CERTIFICATE_FILE),
            ),
            Err(err) => {
                debug!("[inspect] not looking up {:?} in the local store: {}", hostname, err);
                None
            }
        }
    }

    /// Returns the stored PEM bytes, or `None` when the file is absent or unreadable.
    pub async fn read(&self, hostname: &str, environment: Environment) -> Option<(PathBuf, Vec<u8>)> {
        let path = self.path_for(hostname, environment)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some((path, bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("[inspect] no stored certificate at {}", path.display());
                None
            }
            Err(err) => {
                warn!("[inspect] failed to read {}: {}", path.display(), err);
                None
            }
        }
    }
}
