//! ACME issuance over DNS-01.

pub mod csr;
pub mod dns;
mod orchestrator;
pub mod types;

pub use csr::{GeneratedCsr, generate_csr};
pub use dns::{DnsRecordInstruction, dns_record_value};
pub use orchestrator::AcmeOrchestrator;
pub use types::{
    AccountRecord, AcmeError, AuthorizationDiagnostic, CertificateOrder, ChallengeRecord,
    ChallengeStatus, IssuedCertificate, OrchestratorState, RevocationReason,
};
