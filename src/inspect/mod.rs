//! Certificate inspection.
//!
//! Answers "which certificate is actually live for this host": the host is
//! probed directly on each TLS port in priority order, and only when nothing
//! usable comes back does the inspector fall back to the local certificate
//! store, first for the configured environment and then for the other one.
//! Not finding anything is a normal outcome, reported as `None`.

use std::{path::PathBuf, sync::Arc, time::Duration};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{EngineConfig, Environment};

mod parse;
mod probe;
mod store;

pub use parse::{CertificateInfo, NameFields, ParseError};
pub use probe::{CertificateProbe, OpenSslProbe, ProbeError};
pub use store::LocalCertificateStore;

/// Where an inspected certificate came from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InspectionSource {
    LiveProbe { port: u16 },
    LocalStore { environment: Environment, path: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub info: CertificateInfo,
    pub source: InspectionSource,
}

pub struct CertificateInspector {
    probe: Arc<dyn CertificateProbe>,
    store: LocalCertificateStore,
    environment: Environment,
    ports: Vec<u16>,
    connect_timeout: Duration,
}

impl CertificateInspector {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_probe(config, Arc::new(OpenSslProbe::new()))
    }

    pub fn with_probe(config: &EngineConfig, probe: Arc<dyn CertificateProbe>) -> Self {
        Self {
            probe,
            store: LocalCertificateStore::new(config.accounts_root.clone()),
            environment: config.environment,
            ports: config.inspect.ports.clone(),
            connect_timeout: config.inspect.connect_timeout,
        }
    }

    pub fn store(&self) -> &LocalCertificateStore {
        &self.store
    }

    pub async fn inspect(&self, hostname: &str) -> Option<Inspection> {
        if let Some(found) = self.inspect_live(hostname).await {
            return Some(found);
        }

        for environment in [self.environment, self.environment.other()] {
            if let Some(found) = self.inspect_stored(hostname, environment).await {
                return Some(found);
            }
        }

        info!("[inspect] no certificate found for {}", hostname);
        None
    }

    async fn inspect_live(&self, hostname: &str) -> Option<Inspection> {
        for &port in &self.ports {
            let der = match self
                .probe
                .peer_certificate(hostname, port, self.connect_timeout)
                .await
            {
                Ok(Some(der)) => der,
                Ok(None) => {
                    debug!("[inspect] {}:{} presented no certificate", hostname, port);
                    continue;
                }
                Err(err) => {
                    debug!("[inspect] probe {}:{} failed: {}", hostname, port, err);
                    continue;
                }
            };

            match CertificateInfo::from_der(&der) {
                Ok(info) => {
                    info!(
                        "[inspect] live certificate for {} on port {} (expires in {} days)",
                        hostname, port, info.days_until_expiry
                    );
                    return Some(Inspection {
                        info,
                        source: InspectionSource::LiveProbe { port },
                    });
                }
                Err(err) => {
                    warn!(
                        "[inspect] unparseable certificate from {}:{}: {}",
                        hostname, port, err
                    );
                }
            }
        }
        None
    }

    async fn inspect_stored(&self, hostname: &str, environment: Environment) -> Option<Inspection> {
        let (path, pem) = self.store.read(hostname, environment).await?;
        match CertificateInfo::from_pem(&pem) {
            Ok(info) => {
                info!(
                    "[inspect] using stored {} certificate for {} from {}",
                    environment.store_dir(),
                    hostname,
                    path.display()
                );
                Some(Inspection {
                    info,
                    source: InspectionSource::LocalStore { environment, path },
                })
            }
            Err(err) => {
                warn!("[inspect] unparseable certificate at {}: {}", path.display(), err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::{collections::HashMap, fs, sync::Mutex};

    /// Scripted probe keyed by port; records every port it was asked about.
    #[derive(Default)]
    struct ScriptedProbe {
        answers: HashMap<u16, Option<Vec<u8>>>,
        calls: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl CertificateProbe for ScriptedProbe {
        async fn peer_certificate(
            &self,
            _host: &str,
            port: u16,
            _timeout: Duration,
        ) -> Result<Option<Vec<u8>>, ProbeError> {
            self.calls.lock().unwrap().push(port);
            match self.answers.get(&port) {
                Some(answer) => Ok(answer.clone()),
                None => Err(ProbeError::Handshake("connection refused".into())),
            }
        }
    }

    fn temp_root() -> Result<PathBuf> {
        let mut path = std::env::temp_dir();
        path.push(format!("vos_cert_inspect_{}", uuid::Uuid::new_v4().as_simple()));
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn write_cert(root: &PathBuf, host: &str, env: Environment, names: &[&str]) -> Result<String> {
        let certified =
            rcgen::generate_simple_self_signed(names.iter().map(|s| s.to_string()).collect::<Vec<_>>())?;
        let pem = certified.cert.pem();
        let dir = root.join(host).join(env.store_dir());
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("certificate.pem"), &pem)?;
        Ok(pem)
    }

    fn inspector(root: &PathBuf, env: Environment, probe: Arc<ScriptedProbe>) -> CertificateInspector {
        let config = EngineConfig::new(env, root.clone());
        CertificateInspector::with_probe(&config, probe)
    }

    #[tokio::test]
    async fn first_port_with_certificate_wins() -> Result<()> {
        let root = temp_root()?;
        let live = rcgen::generate_simple_self_signed(vec!["live.example.com".to_string()])?;
        let probe = Arc::new(ScriptedProbe {
            answers: HashMap::from([
                (443, None),
                (8443, Some(live.cert.der().to_vec())),
                (9443, Some(vec![1, 2, 3])),
            ]),
            ..Default::default()
        });
        write_cert(&root, "live.example.com", Environment::Staging, &["stored.example.com"])?;

        let found = inspector(&root, Environment::Staging, probe.clone())
            .inspect("live.example.com")
            .await
            .expect("live certificate");
        assert_eq!(found.source, InspectionSource::LiveProbe { port: 8443 });
        assert_eq!(found.info.subject_alt_names, vec!["live.example.com"]);
        assert_eq!(*probe.calls.lock().unwrap(), vec![443, 8443]);

        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[tokio::test]
    async fn configured_environment_is_used_before_the_other() -> Result<()> {
        let root = temp_root()?;
        let prod_pem = write_cert(&root, "cucm.example.com", Environment::Production, &["prod.example.com"])?;
        write_cert(&root, "cucm.example.com", Environment::Staging, &["staging.example.com"])?;

        let found = inspector(&root, Environment::Production, Arc::new(ScriptedProbe::default()))
            .inspect("cucm.example.com")
            .await
            .expect("stored certificate");
        let expected = CertificateInfo::from_pem(prod_pem.as_bytes())?;
        assert_eq!(found.info.fingerprint256, expected.fingerprint256);
        assert!(matches!(
            found.source,
            InspectionSource::LocalStore { environment: Environment::Production, .. }
        ));

        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[tokio::test]
    async fn falls_back_to_other_environment() -> Result<()> {
        let root = temp_root()?;
        write_cert(&root, "cucm.example.com", Environment::Staging, &["staging.example.com"])?;

        let found = inspector(&root, Environment::Production, Arc::new(ScriptedProbe::default()))
            .inspect("cucm.example.com")
            .await
            .expect("stored certificate");
        assert!(matches!(
            found.source,
            InspectionSource::LocalStore { environment: Environment::Staging, .. }
        ));

        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[tokio::test]
    async fn malformed_local_pem_degrades_to_next_source() -> Result<()> {
        let root = temp_root()?;
        let dir = root.join("cucm.example.com").join("staging");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("certificate.pem"), "-----BEGIN CERTIFICATE-----\n!!\n")?;
        write_cert(&root, "cucm.example.com", Environment::Production, &["prod.example.com"])?;

        let found = inspector(&root, Environment::Staging, Arc::new(ScriptedProbe::default()))
            .inspect("cucm.example.com")
            .await
            .expect("fallback certificate");
        assert_eq!(found.info.subject_alt_names, vec!["prod.example.com"]);

        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[tokio::test]
    async fn nothing_anywhere_is_not_found() -> Result<()> {
        let root = temp_root()?;
        let probe = Arc::new(ScriptedProbe::default());
        let found = inspector(&root, Environment::Staging, probe.clone())
            .inspect("host-with-no-cert-anywhere")
            .await;
        assert!(found.is_none());
        assert_eq!(*probe.calls.lock().unwrap(), vec![443, 8443, 9443]);

        fs::remove_dir_all(&root)?;
        Ok(())
    }
}
