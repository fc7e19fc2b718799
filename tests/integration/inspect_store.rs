use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use openssl::{asn1::Asn1Time, hash::MessageDigest, x509::X509};
use vos_cert_engine::{
    CertificateInspector, EngineConfig,
    config::Environment,
    inspect::{CertificateInfo, InspectionSource},
};

use super::test_utils::{UnreachableProbe, create_temp_dir, self_signed_pem, store_certificate};

fn openssl_fingerprint256(cert: &X509) -> Result<String> {
    let digest = cert.digest(MessageDigest::sha256())?;
    Ok(digest.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":"))
}

fn same_instant(expected: &openssl::asn1::Asn1TimeRef, seconds: i64) -> Result<bool> {
    let actual = Asn1Time::from_unix(seconds)?;
    let diff = expected.diff(&actual)?;
    Ok(diff.days == 0 && diff.secs == 0)
}

#[tokio::test]
async fn local_store_fallback_matches_reference_parser() -> Result<()> {
    let root = create_temp_dir("vos_cert_inspect")?;
    let pem = self_signed_pem(&["cucm.example.com", "cucm-sub.example.com"])?;
    let path = store_certificate(&root, "cucm.example.com", Environment::Staging, &pem)?;

    let config = EngineConfig::new(Environment::Staging, &root);
    let inspector = CertificateInspector::with_probe(&config, Arc::new(UnreachableProbe));
    let inspection = inspector
        .inspect("CUCM.example.com.")
        .await
        .context("expected the stored certificate to be found")?;

    assert_eq!(
        inspection.source,
        InspectionSource::LocalStore {
            environment: Environment::Staging,
            path
        }
    );

    let reference = X509::from_pem(pem.as_bytes())?;
    let info = &inspection.info;
    assert_eq!(info.fingerprint256, openssl_fingerprint256(&reference)?);
    assert!(same_instant(reference.not_before(), info.valid_from.timestamp())?);
    assert!(same_instant(reference.not_after(), info.valid_to.timestamp())?);
    assert_eq!(
        info.subject_alt_names,
        vec!["cucm.example.com".to_string(), "cucm-sub.example.com".to_string()]
    );
    assert!(info.is_valid);

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[tokio::test]
async fn falls_back_to_the_other_environment() -> Result<()> {
    let root = create_temp_dir("vos_cert_inspect")?;
    let pem = self_signed_pem(&["unity.example.com"])?;
    store_certificate(&root, "unity.example.com", Environment::Production, &pem)?;

    let config = EngineConfig::new(Environment::Staging, &root);
    let inspector = CertificateInspector::with_probe(&config, Arc::new(UnreachableProbe));
    let inspection = inspector
        .inspect("unity.example.com")
        .await
        .context("expected the production certificate to be found")?;
    assert!(matches!(
        inspection.source,
        InspectionSource::LocalStore { environment: Environment::Production, .. }
    ));

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[tokio::test]
async fn nothing_anywhere_is_not_found() -> Result<()> {
    let root = create_temp_dir("vos_cert_inspect")?;
    let config = EngineConfig::new(Environment::Production, &root);
    let inspector = CertificateInspector::with_probe(&config, Arc::new(UnreachableProbe));
    assert!(inspector.inspect("missing.example.com").await.is_none());

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn issued_material_parses_without_the_inspector() -> Result<()> {
    let pem = self_signed_pem(&["imp.example.com"])?;
    let info = CertificateInfo::from_pem(pem.as_bytes())?;
    assert_eq!(info.subject_alt_names, vec!["imp.example.com".to_string()]);
    assert!(!info.needs_renewal(30));
    Ok(())
}
