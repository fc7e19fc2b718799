//! Full DNS-01 issuance against Pebble, with challtestsrv standing in for the
//! DNS collaborator.
//!
//! Needs a running Pebble and challtestsrv, for example:
//!
//! ```text
//! docker run -d --name challtestsrv -p 8055:8055 ghcr.io/letsencrypt/pebble-challtestsrv
//! docker run -d --name pebble -p 14000:14000 --link challtestsrv \
//!     ghcr.io/letsencrypt/pebble -dnsserver challtestsrv:8053
//! export VOS_CERT_PEBBLE_DIRECTORY=https://localhost:14000/dir
//! export VOS_CERT_CHALLTESTSRV=http://localhost:8055
//! export SSL_CERT_FILE=/path/to/pebble.minica.pem
//! cargo test --features integration-tests pebble
//! ```
//!
//! `SSL_CERT_FILE` makes the ACME client trust Pebble's test CA.

use std::{env, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use vos_cert_engine::{
    AcmeError, AcmeOrchestrator, CertificateInfo, EngineConfig,
    config::Environment,
    issuance::{DnsRecordInstruction, OrchestratorState},
    storage::MemoryAccountStore,
};

use super::test_utils::create_temp_dir;

struct PebbleConfig {
    directory: String,
    challtestsrv: String,
}

fn load_pebble_config() -> Result<PebbleConfig> {
    let directory = env::var("VOS_CERT_PEBBLE_DIRECTORY").context("VOS_CERT_PEBBLE_DIRECTORY not set")?;
    let challtestsrv = env::var("VOS_CERT_CHALLTESTSRV").context("VOS_CERT_CHALLTESTSRV not set")?;
    Ok(PebbleConfig {
        directory,
        challtestsrv: challtestsrv.trim_end_matches('/').to_string(),
    })
}

fn engine_config(pebble: &PebbleConfig) -> Result<EngineConfig> {
    let mut config = EngineConfig::new(Environment::Staging, create_temp_dir("vos_cert_pebble")?);
    config.directory_override = Some(pebble.directory.clone());
    config.acme.settle_delay = Duration::from_millis(500);
    config.acme.poll_interval = Duration::from_secs(1);
    config.acme.validation = Duration::from_secs(60);
    Ok(config)
}

/// Test domains are unique per run so records from earlier runs never match.
fn test_domains(label: &str) -> Vec<String> {
    let run = uuid::Uuid::new_v4().as_simple().to_string();
    vec![
        format!("{label}-{}.vos-cert.test", &run[..8]),
        format!("{label}-sub-{}.vos-cert.test", &run[..8]),
    ]
}

async fn set_txt(http: &reqwest::Client, pebble: &PebbleConfig, record: &DnsRecordInstruction) -> Result<()> {
    http.post(format!("{}/set-txt", pebble.challtestsrv))
        .json(&json!({ "host": format!("{}.", record.record_name), "value": record.value }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

async fn clear_txt(http: &reqwest::Client, pebble: &PebbleConfig, record: &DnsRecordInstruction) -> Result<()> {
    http.post(format!("{}/clear-txt", pebble.challtestsrv))
        .json(&json!({ "host": format!("{}.", record.record_name) }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[tokio::test]
async fn pebble_issues_and_revokes_through_dns01() -> Result<()> {
    let pebble = load_pebble_config()?;
    let config = engine_config(&pebble)?;
    let store = MemoryAccountStore::new();
    let domains = test_domains("cucm");

    let mut orchestrator = AcmeOrchestrator::new(config.clone(), Arc::new(store.clone()), "pebble");
    orchestrator.create_account("pki@example.com", &domains[0]).await?;

    let mut order = orchestrator.request_certificate(None, &domains).await?;
    assert_eq!(order.challenges().len(), domains.len());

    let http = reqwest::Client::new();
    let records: Vec<DnsRecordInstruction> = order
        .challenges()
        .iter()
        .map(AcmeOrchestrator::dns_record_instruction)
        .collect();
    for record in &records {
        set_txt(&http, &pebble, record).await?;
    }

    orchestrator.complete_all_challenges(&mut order).await?;
    orchestrator.wait_for_order_completion(&mut order).await?;
    assert_eq!(orchestrator.state(), &OrchestratorState::OrderValid);

    let issued = orchestrator.finalize_certificate(&mut order, None).await?;
    for record in &records {
        clear_txt(&http, &pebble, record).await?;
    }
    assert_eq!(orchestrator.state(), &OrchestratorState::Issued);
    assert!(issued.private_key_pem.is_some());

    let info = CertificateInfo::from_pem(issued.certificate_pem.as_bytes())?;
    for domain in &domains {
        assert!(
            info.subject_alt_names.contains(domain),
            "{domain} missing from {:?}",
            info.subject_alt_names
        );
    }
    assert!(info.is_valid);

    // A second orchestrator picks the persisted account up and revokes.
    let mut restored = AcmeOrchestrator::new(config, Arc::new(store), "pebble");
    restored
        .load_account(&domains[0])
        .await?
        .ok_or_else(|| anyhow!("account was not persisted"))?;
    restored.revoke_certificate(&issued.certificate_pem, None).await?;
    Ok(())
}

#[tokio::test]
async fn pebble_rejects_unpublished_challenge_with_diagnostics() -> Result<()> {
    let pebble = load_pebble_config()?;
    let store = MemoryAccountStore::new();
    let domains = test_domains("unpublished")[..1].to_vec();

    let mut orchestrator = AcmeOrchestrator::new(engine_config(&pebble)?, Arc::new(store), "pebble");
    orchestrator.create_account("", &domains[0]).await?;
    let mut order = orchestrator.request_certificate(None, &domains).await?;

    orchestrator.complete_all_challenges(&mut order).await?;
    let err = orchestrator
        .wait_for_order_completion(&mut order)
        .await
        .err()
        .ok_or_else(|| anyhow!("order validated without a TXT record"))?;

    assert!(matches!(err, AcmeError::Validation { .. }), "unexpected error: {err}");
    let diagnostic = err
        .diagnostics()
        .first()
        .ok_or_else(|| anyhow!("no diagnostics attached"))?;
    assert_eq!(diagnostic.domain, domains[0]);
    assert_eq!(diagnostic.status, "invalid");
    assert!(matches!(orchestrator.state(), OrchestratorState::Failed(_)));
    Ok(())
}
