use std::path::{Component, Path};

use anyhow::{Result, anyhow};

pub fn normalize_domain(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    // Keep the wildcard label out of IDNA processing.
    let (prefix, rest) = match trimmed.strip_prefix("*.") {
        Some(rest) => ("*.", rest),
        None => ("", trimmed),
    };
    let ascii =
        idna::domain_to_ascii(rest).map_err(|err| anyhow!("invalid domain name: {err}"))?;
    if ascii.is_empty() {
        return Err(anyhow!("invalid domain name: {input}"));
    }
    Ok(format!("{prefix}{}", ascii.to_lowercase()))
}

/// Normalizes an ordered domain set for an order.
/// The first entry stays first (it becomes the primary name); duplicates are rejected.
pub fn normalize_domain_set(domains: &[String]) -> Result<Vec<String>> {
    if domains.is_empty() {
        return Err(anyhow!("At least one domain is required"));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(domains.len());
    for raw in domains {
        let domain = normalize_domain(raw)?;
        if normalized.contains(&domain) {
            return Err(anyhow!("duplicate domain in request: {domain}"));
        }
        normalized.push(domain);
    }
    Ok(normalized)
}

/// Hostname form used as a local store directory name. Anything that is not a
/// single plain path component after IDNA normalization is rejected.
pub fn normalize_hostname(input: &str) -> Result<String> {
    let host = normalize_domain(input)?;
    if host.contains(['/', '\\']) || host.split('.').any(|label| label.is_empty()) {
        return Err(anyhow!("hostname is not usable as a store directory: {input}"));
    }
    let mut components = Path::new(&host).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(host),
        _ => Err(anyhow!("hostname is not usable as a store directory: {input}")),
    }
}
