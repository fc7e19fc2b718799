use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{deadline::DeadlineError, storage::StoreError};

pub use instant_acme::RevocationReason;

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("{step} failed for [{domains}]: transport error: {message}")]
    Transport {
        step: &'static str,
        domains: String,
        message: String,
    },
    #[error("{step} rejected for [{domains}]: {message}")]
    Protocol {
        step: &'static str,
        domains: String,
        message: String,
    },
    #[error("{step} timed out after {}s for [{domains}]", after.as_secs())]
    Timeout {
        step: &'static str,
        domains: String,
        after: Duration,
        /// Authorization detail fetched after the timeout, when any could be.
        diagnostics: Vec<AuthorizationDiagnostic>,
    },
    #[error("order did not validate: {reason}")]
    Validation {
        reason: String,
        diagnostics: Vec<AuthorizationDiagnostic>,
    },
    #[error("no ACME account is loaded")]
    NoAccount,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no dns-01 challenge offered for {domain}")]
    MissingDns01 { domain: String },
    #[error("account store error: {0}")]
    Storage(#[from] StoreError),
    #[error("persisted account is unreadable: {0}")]
    CorruptAccount(String),
    #[error("CSR error: {0}")]
    Csr(String),
}

impl AcmeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AcmeError::Timeout { .. })
    }

    /// Per-domain detail gathered after a validation failure or timeout.
    pub fn diagnostics(&self) -> &[AuthorizationDiagnostic] {
        match self {
            AcmeError::Validation { diagnostics, .. } | AcmeError::Timeout { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }

    pub(crate) fn with_diagnostics(self, diagnostics: Vec<AuthorizationDiagnostic>) -> Self {
        match self {
            AcmeError::Validation { reason, .. } => AcmeError::Validation { reason, diagnostics },
            AcmeError::Timeout {
                step, domains, after, ..
            } => AcmeError::Timeout {
                step,
                domains,
                after,
                diagnostics,
            },
            other => other,
        }
    }
}

impl From<DeadlineError> for AcmeError {
    fn from(err: DeadlineError) -> Self {
        deadline_failure(err, &[])
    }
}

/// Maps an elapsed or aborted step onto the taxonomy, naming the domain set.
pub(crate) fn deadline_failure(err: DeadlineError, domains: &[String]) -> AcmeError {
    let domains = domains.join(", ");
    match err {
        DeadlineError::Elapsed { step, after } => AcmeError::Timeout {
            step,
            domains,
            after,
            diagnostics: Vec::new(),
        },
        DeadlineError::Aborted { step, reason } => AcmeError::Transport {
            step,
            domains,
            message: reason,
        },
    }
}

/// Maps a library failure for `step` onto the error taxonomy: server
/// problem documents are protocol errors, everything else is transport.
pub(crate) fn acme_failure(step: &'static str, domains: &[String], err: instant_acme::Error) -> AcmeError {
    let domains = domains.join(", ");
    match err {
        instant_acme::Error::Api(problem) => AcmeError::Protocol {
            step,
            domains,
            message: problem.to_string(),
        },
        other => AcmeError::Transport {
            step,
            domains,
            message: other.to_string(),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum OrchestratorState {
    Uninitialized,
    AccountReady,
    OrderCreated,
    AuthorizationsFetched,
    ValidationPolling,
    OrderValid,
    Finalizing,
    Issued,
    Failed(String),
}

/// A registered ACME account bound to one orchestrator.
#[derive(Clone)]
pub struct AccountRecord {
    pub email: String,
    pub directory_url: String,
    /// Server-assigned account URL.
    pub account_url: String,
    pub domain: String,
    pub connection_id: String,
    pub(crate) credentials: Zeroizing<String>,
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("email", &self.email)
            .field("directory_url", &self.directory_url)
            .field("account_url", &self.account_url)
            .field("domain", &self.domain)
            .field("connection_id", &self.connection_id)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct PersistedAccountRef<'a> {
    email: &'a str,
    directory_url: &'a str,
    account_url: &'a str,
    domain: &'a str,
    connection_id: &'a str,
    credentials: &'a str,
}

#[derive(Deserialize)]
struct PersistedAccount {
    email: String,
    directory_url: String,
    account_url: String,
    domain: String,
    connection_id: String,
    credentials: String,
}

impl AccountRecord {
    pub(crate) fn to_blob(&self) -> Result<Zeroizing<Vec<u8>>, AcmeError> {
        let persisted = PersistedAccountRef {
            email: &self.email,
            directory_url: &self.directory_url,
            account_url: &self.account_url,
            domain: &self.domain,
            connection_id: &self.connection_id,
            credentials: &self.credentials,
        };
        serde_json::to_vec(&persisted)
            .map(Zeroizing::new)
            .map_err(|err| AcmeError::CorruptAccount(err.to_string()))
    }

    pub(crate) fn from_blob(blob: &[u8]) -> Result<Self, AcmeError> {
        let persisted: PersistedAccount =
            serde_json::from_slice(blob).map_err(|err| AcmeError::CorruptAccount(err.to_string()))?;
        Ok(Self {
            email: persisted.email,
            directory_url: persisted.directory_url,
            account_url: persisted.account_url,
            domain: persisted.domain,
            connection_id: persisted.connection_id,
            credentials: Zeroizing::new(persisted.credentials),
        })
    }
}

/// The account URL lives in the serialized credentials' `id` field; the
/// credentials type does not expose it directly.
pub(crate) fn read_account_id(credentials_json: &str) -> Result<String, AcmeError> {
    #[derive(Deserialize)]
    struct IdInfo {
        id: String,
    }
    let info: IdInfo = serde_json::from_str(credentials_json)
        .map_err(|err| AcmeError::CorruptAccount(format!("credentials without account id: {err}")))?;
    Ok(info.id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// instant-acme does not export its challenge status type, so the library
    /// value is read through its `Debug` rendering. Unknown names read as pending.
    pub(crate) fn from_debug(status: &impl fmt::Debug) -> Self {
        match format!("{status:?}").as_str() {
            "Processing" => ChallengeStatus::Processing,
            "Valid" => ChallengeStatus::Valid,
            "Invalid" => ChallengeStatus::Invalid,
            _ => ChallengeStatus::Pending,
        }
    }
}

/// A DNS-01 challenge for one domain of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeRecord {
    pub url: String,
    pub token: String,
    pub status: ChallengeStatus,
    pub domain: String,
    pub key_authorization: String,
}

/// Per-domain status fetched after a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationDiagnostic {
    pub domain: String,
    pub status: String,
    pub challenge_status: Option<String>,
    pub detail: Option<String>,
}

/// An order in flight. Owns the library order handle; dropping it abandons
/// the order locally while the server-side order simply expires.
pub struct CertificateOrder {
    pub(crate) order: instant_acme::Order,
    pub url: String,
    pub domains: Vec<String>,
    pub csr_pem: String,
    pub(crate) csr_der: Vec<u8>,
    /// Present when the engine generated the CSR itself.
    pub private_key_pem: Option<Zeroizing<String>>,
    pub challenges: Vec<ChallengeRecord>,
}

impl CertificateOrder {
    pub fn challenges(&self) -> &[ChallengeRecord] {
        &self.challenges
    }

    pub fn challenge_for(&self, domain: &str) -> Option<&ChallengeRecord> {
        self.challenges.iter().find(|challenge| challenge.domain == domain)
    }
}

impl fmt::Debug for CertificateOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateOrder")
            .field("url", &self.url)
            .field("domains", &self.domains)
            .field("challenges", &self.challenges)
            .field("private_key_pem", &self.private_key_pem.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub struct IssuedCertificate {
    /// Leaf plus chain, as returned by the CA.
    pub certificate_pem: String,
    pub private_key_pem: Option<Zeroizing<String>>,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &self.private_key_pem.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
