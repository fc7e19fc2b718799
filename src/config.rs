//! Deployment-wide configuration.
//!
//! The staging/production switch, the local certificate store root, and the
//! per-call time budgets are carried in one explicit [`EngineConfig`] value
//! that callers hand to the orchestrator and the inspector.

use std::{path::PathBuf, time::Duration};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// TLS ports probed by the inspector, in priority order.
pub const DEFAULT_PROBE_PORTS: [u16; 3] = [443, 8443, 9443];

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_ACCOUNTS_ROOT: &str = "./accounts";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown environment '{0}' (expected staging or production)")]
    UnknownEnvironment(String),
}

/// Which ACME environment the deployment issues against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Staging,
    Production,
}

impl Environment {
    pub fn directory_url(&self) -> &'static str {
        match self {
            Environment::Staging => LETSENCRYPT_STAGING,
            Environment::Production => LETSENCRYPT_PRODUCTION,
        }
    }

    /// Subdirectory name used by the local certificate store.
    pub fn store_dir(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "prod",
        }
    }

    pub fn other(&self) -> Environment {
        match self {
            Environment::Staging => Environment::Production,
            Environment::Production => Environment::Staging,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Time budgets for each network-facing ACME step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeTimeouts {
    pub account: Duration,
    pub order: Duration,
    pub authorizations: Duration,
    pub challenge_ready: Duration,
    /// Pause before the first order poll so the server can start validating.
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub validation: Duration,
    pub finalize: Duration,
    pub download: Duration,
    pub revoke: Duration,
}

impl Default for AcmeTimeouts {
    fn default() -> Self {
        Self {
            account: Duration::from_secs(30),
            order: Duration::from_secs(15),
            authorizations: Duration::from_secs(30),
            challenge_ready: Duration::from_secs(15),
            settle_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(3),
            validation: Duration::from_secs(300),
            finalize: Duration::from_secs(60),
            download: Duration::from_secs(60),
            revoke: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectSettings {
    pub ports: Vec<u16>,
    pub connect_timeout: Duration,
}

impl Default for InspectSettings {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PROBE_PORTS.to_vec(),
            connect_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub environment: Environment,
    /// Root of `<root>/<hostname>/<staging|prod>/certificate.pem`.
    pub accounts_root: PathBuf,
    /// Explicit directory URL (e.g. a Pebble instance); overrides the environment's.
    #[serde(default)]
    pub directory_override: Option<String>,
    #[serde(default)]
    pub acme: AcmeTimeouts,
    #[serde(default)]
    pub inspect: InspectSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            accounts_root: PathBuf::from(DEFAULT_ACCOUNTS_ROOT),
            directory_override: None,
            acme: AcmeTimeouts::default(),
            inspect: InspectSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(environment: Environment, accounts_root: impl Into<PathBuf>) -> Self {
        Self {
            environment,
            accounts_root: accounts_root.into(),
            ..Self::default()
        }
    }

    /// Builds a configuration from `VOS_CERT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match std::env::var("VOS_CERT_ENVIRONMENT") {
            Ok(raw) if !raw.trim().is_empty() => Environment::parse(&raw)?,
            _ => Environment::default(),
        };
        let accounts_root = std::env::var("VOS_CERT_ACCOUNTS_ROOT")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ACCOUNTS_ROOT));
        let directory_override = std::env::var("VOS_CERT_ACME_DIRECTORY")
            .ok()
            .filter(|raw| !raw.trim().is_empty());

        Ok(Self {
            environment,
            accounts_root,
            directory_override,
            acme: AcmeTimeouts::default(),
            inspect: InspectSettings {
                connect_timeout: resolve_probe_timeout(),
                ..InspectSettings::default()
            },
        })
    }

    pub fn directory_url(&self) -> &str {
        self.directory_override
            .as_deref()
            .unwrap_or_else(|| self.environment.directory_url())
    }
}

fn resolve_probe_timeout() -> Duration {
    let timeout = std::env::var("VOS_CERT_PROBE_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS);
    if timeout == 0 {
        warn!("[config] invalid probe timeout value; using default");
        return Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS);
    }
    Duration::from_secs(timeout)
}
