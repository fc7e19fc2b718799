//! SQLite-backed account store.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use log::debug;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use zeroize::Zeroizing;

use super::{AccountBlob, AccountKey, AccountStore, StoreError};

const DB_FILE: &str = "accounts.sqlite";

#[derive(Clone)]
pub struct SqliteAccountStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteAccountStore {
    /// Opens (or creates) `accounts.sqlite` under `data_dir`.
    pub fn initialize_with_path(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join(DB_FILE);
        let created = !db_path.exists();
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        Self::configure_connection(&conn)?;
        Self::init_schema(&conn)?;
        Self::enforce_permissions(&db_path, created)?;
        debug!("[store] account store ready at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn configure_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS acme_accounts (
                connection_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                provider TEXT NOT NULL,
                blob BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (connection_id, domain, provider)
            );
            "#,
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|err| StoreError::Poisoned(err.to_string()))
    }

    #[cfg(unix)]
    fn enforce_permissions(db_path: &Path, created: bool) -> Result<(), StoreError> {
        use std::os::unix::fs::PermissionsExt;

        let desired = fs::Permissions::from_mode(0o600);
        if created || fs::metadata(db_path)?.permissions().mode() & 0o177 != 0 {
            fs::set_permissions(db_path, desired)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn enforce_permissions(_db_path: &Path, _created: bool) -> Result<(), StoreError> {
        Ok(())
    }
}

impl AccountStore for SqliteAccountStore {
    fn save(&self, key: &AccountKey, blob: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO acme_accounts (connection_id, domain, provider, blob, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(connection_id, domain, provider) DO UPDATE
            SET blob = excluded.blob,
                updated_at = excluded.updated_at
            "#,
            params![
                key.connection_id,
                key.domain,
                key.provider,
                blob,
                Utc::now().to_rfc3339()
            ],
        )?;
        debug!("[store] saved account {:?}", key);
        Ok(())
    }

    fn load(&self, key: &AccountKey) -> Result<Option<AccountBlob>, StoreError> {
        let conn = self.lock_conn()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                r#"
                SELECT blob FROM acme_accounts
                WHERE connection_id = ?1 AND domain = ?2 AND provider = ?3
                "#,
                params![key.connection_id, key.domain, key.provider],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(Zeroizing::new))
    }
}
