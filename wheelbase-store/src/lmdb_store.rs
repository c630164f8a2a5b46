//! LMDB-backed durable tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the long-lived bottom of
//! the tier chain. Entries stored here carry no default TTL: a vehicle
//! record leaves the durable tier only through explicit invalidation.
//!
//! Unlike the volatile tiers, LMDB can fail in interesting ways (map full,
//! corrupt environment, I/O errors). Per the best-effort store contract all
//! of those are absorbed into log lines: a failed read is a miss, a failed
//! write is dropped.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde_json::Value;

use crate::keyed::{CacheEntry, KeyedStore};

/// Error type for LMDB store operations. Internal only: the `KeyedStore`
/// impl absorbs every variant into a log line.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hit/miss counters for the durable tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
}

/// Durable key-value tier over LMDB.
///
/// Keys are the repository's logical cache keys (`vehicle:{id}`,
/// `history`, ...); values are JSON-encoded [`CacheEntry`] wrappers so the
/// expiry metadata survives a restart.
pub struct LmdbStore {
    env: Env,
    db: Database<Str, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbStore {
    /// Open (or create) a durable store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn try_get(&self, key: &str) -> Result<Option<CacheEntry<Value>>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        match self
            .db
            .get(&rtxn, key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some(bytes) => {
                let entry: CacheEntry<Value> = serde_json::from_slice(bytes)
                    .map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn try_set(&self, key: &str, entry: &CacheEntry<Value>) -> Result<(), LmdbStoreError> {
        let bytes =
            serde_json::to_vec(entry).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key, &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    fn try_remove(&self, key: &str) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    fn try_keys(&self) -> Result<Vec<String>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        for result in iter {
            match result {
                Ok((key, _)) => keys.push(key.to_string()),
                Err(_) => continue,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl KeyedStore for LmdbStore {
    fn name(&self) -> &str {
        "durable"
    }

    fn default_ttl(&self) -> Option<Duration> {
        // Durable entries live until explicitly invalidated.
        None
    }

    async fn get_raw(&self, key: &str) -> Option<CacheEntry<Value>> {
        match self.try_get(key) {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(store = "durable", key, error = %e, "Durable read failed");
                None
            }
        }
    }

    async fn set_raw(&self, key: &str, entry: CacheEntry<Value>) {
        if let Err(e) = self.try_set(key, &entry) {
            tracing::warn!(store = "durable", key, error = %e, "Durable write failed");
        }
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.try_remove(key) {
            tracing::warn!(store = "durable", key, error = %e, "Durable delete failed");
        }
    }

    async fn keys(&self) -> Vec<String> {
        match self.try_keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(store = "durable", error = %e, "Durable key scan failed");
                Vec::new()
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
