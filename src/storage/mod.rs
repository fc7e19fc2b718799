//! Account persistence collaborator.
//!
//! The orchestrator hands serialized account material to an [`AccountStore`]
//! and reads it back by `(connection_id, domain, provider)`. Stores hold at
//! most one blob per key; a save replaces whatever was there.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;
use zeroize::Zeroizing;

pub mod sqlite;

pub use sqlite::SqliteAccountStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("account store lock poisoned: {0}")]
    Poisoned(String),
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccountKey {
    pub connection_id: String,
    pub domain: String,
    pub provider: String,
}

impl AccountKey {
    pub fn new(
        connection_id: impl Into<String>,
        domain: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            domain: domain.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.connection_id, self.domain, self.provider)
    }
}

/// Blobs contain private key material and are zeroized on drop.
pub type AccountBlob = Zeroizing<Vec<u8>>;

pub trait AccountStore: Send + Sync {
    fn save(&self, key: &AccountKey, blob: &[u8]) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing was saved for `key`.
    fn load(&self, key: &AccountKey) -> Result<Option<AccountBlob>, StoreError>;
}

#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    entries: Arc<Mutex<HashMap<AccountKey, AccountBlob>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<AccountKey, AccountBlob>>, StoreError> {
        self.entries
            .lock()
            .map_err(|err| StoreError::Poisoned(err.to_string()))
    }
}

impl AccountStore for MemoryAccountStore {
    fn save(&self, key: &AccountKey, blob: &[u8]) -> Result<(), StoreError> {
        self.lock()?
            .insert(key.clone(), Zeroizing::new(blob.to_vec()));
        Ok(())
    }

    fn load(&self, key: &AccountKey) -> Result<Option<AccountBlob>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }
}
