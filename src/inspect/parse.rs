use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::*;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid PEM: {0}")]
    Pem(String),
    #[error("no CERTIFICATE block found")]
    NoCertificate,
    #[error("empty certificate")]
    Empty,
    #[error("invalid X.509 DER: {0}")]
    Der(String),
    #[error("certificate validity timestamp out of range")]
    Timestamp,
}

/// Selected distinguished-name attributes.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct NameFields {
    pub cn: Option<String>,
    pub o: Option<String>,
    pub ou: Option<String>,
}

/// Snapshot of a certificate's metadata, computed at inspection time.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: NameFields,
    pub issuer: NameFields,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    /// SHA-1 over the DER encoding, colon-separated uppercase hex.
    pub fingerprint: String,
    /// SHA-256 over the DER encoding, colon-separated uppercase hex.
    pub fingerprint256: String,
    pub serial_number: String,
    pub subject_alt_names: Vec<String>,
    pub is_valid: bool,
    pub days_until_expiry: i64,
}

impl CertificateInfo {
    /// Parses the first CERTIFICATE block of a PEM document.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, ParseError> {
        Self::from_pem_at(pem_bytes, Utc::now())
    }

    pub fn from_pem_at(pem_bytes: &[u8], now: DateTime<Utc>) -> Result<Self, ParseError> {
        let blocks = ::pem::parse_many(pem_bytes).map_err(|e| ParseError::Pem(e.to_string()))?;
        let block = blocks
            .iter()
            .find(|block| block.tag() == "CERTIFICATE")
            .ok_or(ParseError::NoCertificate)?;
        Self::from_der_at(block.contents(), now)
    }

    pub fn from_der(der: &[u8]) -> Result<Self, ParseError> {
        Self::from_der_at(der, Utc::now())
    }

    pub fn from_der_at(der: &[u8], now: DateTime<Utc>) -> Result<Self, ParseError> {
        if der.is_empty() {
            return Err(ParseError::Empty);
        }
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| ParseError::Der(e.to_string()))?;

        let valid_from = to_utc(cert.validity().not_before.timestamp())?;
        let valid_to = to_utc(cert.validity().not_after.timestamp())?;

        let subject_alt_names = match cert.subject_alternative_name() {
            Ok(Some(ext)) => ext
                .value
                .general_names
                .iter()
                .filter_map(general_name_to_string)
                .collect(),
            Ok(None) => Vec::new(),
            Err(err) => {
                log::warn!("[inspect] unreadable subjectAltName extension: {}", err);
                Vec::new()
            }
        };

        Ok(CertificateInfo {
            subject: name_fields(cert.subject()),
            issuer: name_fields(cert.issuer()),
            valid_from,
            valid_to,
            fingerprint: colon_hex(&openssl::sha::sha1(der)),
            fingerprint256: colon_hex(&Sha256::digest(der)),
            serial_number: serial_hex(cert.raw_serial()),
            subject_alt_names,
            is_valid: now >= valid_from && now <= valid_to,
            days_until_expiry: (valid_to - now).num_seconds().div_euclid(SECONDS_PER_DAY),
        })
    }

    /// True when the certificate expires within `threshold_days` (or already has).
    pub fn needs_renewal(&self, threshold_days: i64) -> bool {
        !self.is_valid || self.days_until_expiry < threshold_days
    }
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>, ParseError> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or(ParseError::Timestamp)
}

fn name_fields(name: &X509Name<'_>) -> NameFields {
    NameFields {
        cn: first_attr(name.iter_common_name()),
        o: first_attr(name.iter_organization()),
        ou: first_attr(name.iter_organizational_unit()),
    }
}

fn first_attr<'a, 'b>(mut iter: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>) -> Option<String>
where
    'b: 'a,
{
    iter.next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}

fn general_name_to_string(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::DNSName(dns) => Some(dns.to_string()),
        GeneralName::IPAddress(bytes) => match bytes.len() {
            4 => Some(std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string()),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Some(std::net::Ipv6Addr::from(octets).to_string())
            }
            _ => None,
        },
        GeneralName::RFC822Name(email) => Some(email.to_string()),
        GeneralName::URI(uri) => Some(uri.to_string()),
        _ => None,
    }
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn serial_hex(raw: &[u8]) -> String {
    let significant = raw
        .iter()
        .position(|b| *b != 0)
        .map(|start| &raw[start..])
        .unwrap_or(&[0u8][..]);
    hex::encode_upper(significant)
}
