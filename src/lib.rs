//! Certificate lifecycle engine for Cisco VOS appliances and general servers:
//! DNS-01 issuance over ACME, remote CLI automation for installation and
//! service restarts, and live certificate inspection.

pub mod config;
pub mod deadline;
pub mod domain;
pub mod inspect;
pub mod issuance;
pub mod shell;
pub mod storage;

pub use config::{EngineConfig, Environment};
pub use inspect::{CertificateInfo, CertificateInspector, Inspection};
pub use issuance::{AcmeError, AcmeOrchestrator};
pub use shell::{RemoteShellAutomaton, ShellCommand, ShellOutcome, SshTarget};
