use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use zeroize::Zeroizing;

use super::types::AcmeError;

const CSR_TAGS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

pub struct GeneratedCsr {
    pub csr_pem: String,
    pub private_key_pem: Zeroizing<String>,
}

/// Generates a fresh key pair and a CSR naming every domain as a SAN, with
/// the first domain as the subject CN.
pub fn generate_csr(domains: &[String]) -> Result<GeneratedCsr, AcmeError> {
    let primary = domains
        .first()
        .ok_or_else(|| AcmeError::InvalidRequest("at least one domain is required".into()))?;

    let key = KeyPair::generate().map_err(|e| AcmeError::Csr(format!("failed to generate key pair: {e}")))?;
    let mut params = CertificateParams::new(domains.to_vec())
        .map_err(|e| AcmeError::Csr(format!("invalid subject alternative names: {e}")))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, primary.clone());
    params.distinguished_name = dn;

    let csr = params
        .serialize_request(&key)
        .map_err(|e| AcmeError::Csr(format!("failed to create CSR: {e}")))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| AcmeError::Csr(format!("failed to encode CSR: {e}")))?;

    Ok(GeneratedCsr {
        csr_pem,
        private_key_pem: Zeroizing::new(key.serialize_pem()),
    })
}

/// DER bytes of a PEM-encoded CSR.
pub fn csr_der_from_pem(csr_pem: &str) -> Result<Vec<u8>, AcmeError> {
    let block = pem::parse(csr_pem).map_err(|e| AcmeError::Csr(format!("invalid CSR PEM: {e}")))?;
    if !CSR_TAGS.contains(&block.tag()) {
        return Err(AcmeError::Csr(format!(
            "expected a certificate request, found {}",
            block.tag()
        )));
    }
    Ok(block.into_contents())
}
