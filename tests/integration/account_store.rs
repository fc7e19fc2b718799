use std::{fs, sync::Arc};

use anyhow::Result;
use vos_cert_engine::{
    AcmeOrchestrator, EngineConfig,
    config::Environment,
    storage::{AccountKey, AccountStore, SqliteAccountStore},
};

use super::test_utils::create_temp_dir;

#[test]
fn accounts_survive_reopening_the_database() -> Result<()> {
    let dir = create_temp_dir("vos_cert_accounts")?;
    let key = AccountKey::new("cucm-pub", "cucm.example.com", "letsencrypt-prod");
    {
        let store = SqliteAccountStore::initialize_with_path(&dir)?;
        store.save(&key, b"{\"account\":1}")?;
    }

    let reopened = SqliteAccountStore::initialize_with_path(&dir)?;
    let blob = reopened.load(&key)?.map(|blob| blob.to_vec());
    assert_eq!(blob.as_deref(), Some(&b"{\"account\":1}"[..]));

    let other_provider = AccountKey::new("cucm-pub", "cucm.example.com", "letsencrypt-staging");
    assert!(reopened.load(&other_provider)?.is_none());

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[tokio::test]
async fn orchestrator_reports_missing_account_as_none() -> Result<()> {
    let dir = create_temp_dir("vos_cert_accounts")?;
    let store = Arc::new(SqliteAccountStore::initialize_with_path(&dir)?);
    let config = EngineConfig::new(Environment::Production, &dir);
    let mut orchestrator = AcmeOrchestrator::new(config, store, "cucm-pub");

    assert!(orchestrator.load_account("cucm.example.com").await?.is_none());
    assert!(orchestrator.account().is_none());

    fs::remove_dir_all(&dir)?;
    Ok(())
}
