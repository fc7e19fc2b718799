//! DNS-01 record derivation.
//!
//! The engine never publishes records itself. It computes the TXT value and
//! hands a [`DnsRecordInstruction`] to whichever DNS collaborator the caller
//! uses, which publishes it and later removes it.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// TXT record the DNS collaborator must publish before the challenge is signalled ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecordInstruction {
    pub record_name: String,
    pub value: String,
    pub zone: String,
}

impl DnsRecordInstruction {
    pub fn new(domain: &str, key_authorization: &str) -> Self {
        Self {
            record_name: record_name(domain),
            value: dns_record_value(key_authorization),
            zone: derive_zone(domain),
        }
    }
}

/// base64url (unpadded) SHA-256 digest of the key authorization.
pub fn dns_record_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// `_acme-challenge.<domain>`; wildcard orders validate on the base name.
pub fn record_name(domain: &str) -> String {
    let trimmed = domain.trim_end_matches('.');
    let trimmed = trimmed.strip_prefix("*.").unwrap_or(trimmed);
    if trimmed.starts_with("_acme-challenge.") {
        trimmed.to_string()
    } else {
        format!("_acme-challenge.{trimmed}")
    }
}

/// Registrable zone guess: the last two labels.
pub fn derive_zone(domain: &str) -> String {
    let trimmed = domain.trim_end_matches('.');
    let trimmed = trimmed.strip_prefix("*.").unwrap_or(trimmed);
    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        trimmed.to_string()
    }
}
