//! SQLite store handle via sqlx.
//!
//! Each named instance ("real", "decoy") is its own database file opened with
//! its own 32-byte key. Sensitive columns are sealed with that key; the
//! `store_meta.key_check` row lets `open` reject a wrong key before anything
//! else is read.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use hv_crypto::{aead, CryptoError};

use crate::error::StoreError;
use crate::models::{now, to_millis};

const KEY_CHECK_PLAINTEXT: &[u8] = b"haven-store-key-check-v1";
const SHRED_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreName {
    Real,
    Decoy,
}

impl StoreName {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreName::Real => "real",
            StoreName::Decoy => "decoy",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            StoreName::Real => "real.db",
            StoreName::Decoy => "decoy.db",
        }
    }
}

impl std::fmt::Display for StoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symmetric key for one store instance. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StoreKey([u8; 32]);

impl StoreKey {
    pub fn generate() -> Self {
        let key = aead::generate_key();
        Self(*key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreKey([redacted])")
    }
}

/// Store handle. Cheap to clone; the key is shared and wiped when the last
/// clone drops.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    key: Arc<StoreKey>,
    name: StoreName,
    path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at `db_path`, run pending migrations and
    /// check `key` against the stored key-check row.
    ///
    /// WAL and foreign keys are set on the connection; SQLite refuses to
    /// change `journal_mode` inside the transaction sqlx wraps migrations in.
    pub async fn open(db_path: &Path, name: StoreName, key: StoreKey) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            pool.close().await;
            return Err(StoreError::Migration(e.to_string()));
        }

        let store = Self {
            pool,
            key: Arc::new(key),
            name,
            path: db_path.to_path_buf(),
        };

        if let Err(e) = store.check_key().await {
            store.pool.close().await;
            return Err(e);
        }

        tracing::debug!(event = "store_opened", store = %name);
        Ok(store)
    }

    /// Open the instance file for `name` inside `dir`.
    pub async fn open_in(dir: &Path, name: StoreName, key: StoreKey) -> Result<Self, StoreError> {
        Self::open(&dir.join(name.file_name()), name, key).await
    }

    pub fn name(&self) -> StoreName {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn check_key(&self) -> Result<(), StoreError> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT key_check FROM store_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            Some(sealed) => match self.decrypt_value("store_meta.key_check", &sealed) {
                Ok(pt) if pt.as_slice() == KEY_CHECK_PLAINTEXT => Ok(()),
                Ok(_) | Err(StoreError::Crypto(CryptoError::AuthenticationFailed)) => {
                    tracing::warn!(event = "store_key_rejected", store = %self.name);
                    Err(StoreError::WrongKey)
                }
                Err(e) => Err(e),
            },
            None => {
                let sealed = self.encrypt_value("store_meta.key_check", KEY_CHECK_PLAINTEXT)?;
                sqlx::query(
                    "INSERT INTO store_meta (id, store_name, key_check, created_at) VALUES (1, ?, ?, ?)",
                )
                .bind(self.name.as_str())
                .bind(sealed)
                .bind(to_millis(now()))
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    /// Seal a column value. `context` names the column and row so sealed
    /// values cannot be moved between them.
    pub fn encrypt_value(&self, context: &str, plaintext: &[u8]) -> Result<String, StoreError> {
        let ct = aead::encrypt_combined(self.key.as_bytes(), plaintext, &column_aad(context))?;
        Ok(URL_SAFE_NO_PAD.encode(ct))
    }

    pub fn decrypt_value(&self, context: &str, b64: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let ct = URL_SAFE_NO_PAD
            .decode(b64)
            .map_err(|e| StoreError::Crypto(CryptoError::Base64Decode(e)))?;
        Ok(aead::decrypt_combined(self.key.as_bytes(), &ct, &column_aad(context))?)
    }

    pub(crate) fn decrypt_string(&self, context: &str, b64: &str) -> Result<String, StoreError> {
        let pt = self.decrypt_value(context, b64)?;
        String::from_utf8(pt.to_vec())
            .map_err(|_| StoreError::Corrupt(format!("{context}: not utf-8")))
    }

    /// Close the pool, then shred the database files (see `shred_database`).
    pub async fn destroy(self) -> Result<(), StoreError> {
        self.pool.close().await;
        shred_database(&self.path).await?;
        tracing::info!(event = "store_destroyed", store = %self.name);
        Ok(())
    }
}

/// Overwrite a database file and its WAL/SHM/journal companions with random
/// bytes, then unlink them. Missing files are skipped. Every file is
/// attempted; the first failure is returned.
pub async fn shred_database(db_path: &Path) -> Result<(), StoreError> {
    let files = companion_files(db_path);
    let result = tokio::task::spawn_blocking(move || {
        let mut first_err: Option<std::io::Error> = None;
        for file in &files {
            match shred_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        event = "store_shred_failed",
                        path = %file.display(),
                        error = %e
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    match result {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn column_aad(context: &str) -> Vec<u8> {
    let mut aad = b"haven-store-v1:".to_vec();
    aad.extend_from_slice(context.as_bytes());
    aad
}

fn companion_files(db_path: &Path) -> Vec<PathBuf> {
    let mut files = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut os: OsString = db_path.as_os_str().to_owned();
        os.push(suffix);
        files.push(PathBuf::from(os));
    }
    files
}

fn shred_file(path: &Path) -> std::io::Result<()> {
    let len = std::fs::metadata(path)?.len();
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    let mut buf = vec![0u8; SHRED_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(SHRED_CHUNK as u64) as usize;
        OsRng.fill_bytes(&mut buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    file.sync_all()?;
    drop(file);
    std::fs::remove_file(path)
}
