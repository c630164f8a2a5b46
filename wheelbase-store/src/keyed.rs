//! Keyed store abstraction and the in-memory backend.
//!
//! A `KeyedStore` is one storage backend (memory map, durable on-disk store)
//! behind a uniform key/value surface with per-entry expiry. Backends are
//! best-effort by contract: reads degrade to misses and writes are swallowed
//! with a log line, so a broken backend can never fail a caller.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use wheelbase_core::Timestamp;

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// A stored value wrapped with creation and expiry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: Timestamp,
    /// `None` means the entry never expires by TTL.
    pub expires_at: Option<Timestamp>,
}

impl<T> CacheEntry<T> {
    /// Create an entry stamped now, expiring after `ttl` if one is given.
    ///
    /// A zero `ttl` produces an entry that is already expired, which the
    /// next read treats as a miss and removes.
    pub fn fresh(data: T, ttl: Option<Duration>) -> Self {
        let created_at = Utc::now();
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| created_at + ttl)
        });
        Self {
            data,
            created_at,
            expires_at,
        }
    }

    /// Whether the entry had expired at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time elapsed since the entry was written.
    pub fn age(&self) -> Duration {
        let now = Utc::now();
        if now > self.created_at {
            (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    /// Map the inner value to a new type, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> CacheEntry<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheEntry {
            data: f(self.data),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

// ============================================================================
// KEYED STORE TRAIT
// ============================================================================

/// One storage backend with per-entry expiry.
///
/// The trait is object-safe over raw JSON values so a tier chain can hold
/// heterogeneous backends as `Arc<dyn KeyedStore>`; typed access lives in
/// [`KeyedStoreExt`].
///
/// # Failure semantics
///
/// Cache writes are best-effort. Implementations must absorb backend
/// failures (quota, serialization, disabled storage): `get_raw` returns
/// `None` instead of erroring, `set_raw` and `remove` log and return.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Backend name, used in log lines.
    fn name(&self) -> &str;

    /// Default TTL applied when a write does not specify one.
    ///
    /// Short for volatile/session-like backends, `None` (no expiry) for
    /// durable backends.
    fn default_ttl(&self) -> Option<Duration>;

    /// Get the raw entry for a key, expired or not.
    async fn get_raw(&self, key: &str) -> Option<CacheEntry<Value>>;

    /// Store a raw entry under a key.
    async fn set_raw(&self, key: &str, entry: CacheEntry<Value>);

    /// Remove a key.
    async fn remove(&self, key: &str);

    /// List every stored key, for maintenance sweeps.
    async fn keys(&self) -> Vec<String>;
}

/// Typed access over the raw [`KeyedStore`] surface.
#[async_trait]
pub trait KeyedStoreExt: KeyedStore {
    /// Get and deserialize an entry.
    ///
    /// Performs lazy expiry: an expired entry behaves as a miss and is
    /// removed as a side effect. An undeserializable entry is treated the
    /// same way, so a schema change self-heals instead of wedging a key.
    async fn get<T>(&self, key: &str) -> Option<CacheEntry<T>>
    where
        T: DeserializeOwned + Send,
    {
        let entry = self.get_raw(key).await?;
        if entry.is_expired() {
            self.remove(key).await;
            return None;
        }
        match serde_json::from_value(entry.data.clone()) {
            Ok(data) => Some(CacheEntry {
                data,
                created_at: entry.created_at,
                expires_at: entry.expires_at,
            }),
            Err(e) => {
                tracing::warn!(
                    store = self.name(),
                    key,
                    error = %e,
                    "Discarding undeserializable cache entry"
                );
                self.remove(key).await;
                None
            }
        }
    }

    /// Serialize and store a value, using the backend default TTL when
    /// `ttl` is `None`.
    async fn set<T>(&self, key: &str, data: &T, ttl: Option<Duration>)
    where
        T: Serialize + Sync,
    {
        match serde_json::to_value(data) {
            Ok(value) => {
                let ttl = ttl.or_else(|| self.default_ttl());
                self.set_raw(key, CacheEntry::fresh(value, ttl)).await;
            }
            Err(e) => {
                tracing::warn!(
                    store = self.name(),
                    key,
                    error = %e,
                    "Failed to serialize cache value"
                );
            }
        }
    }
}

impl<S: KeyedStore + ?Sized> KeyedStoreExt for S {}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

/// Volatile in-memory backend, the fastest tier.
///
/// Lost on process exit, so it carries a short default TTL. The repository
/// treats it the way the web client treats its session storage.
pub struct MemoryStore {
    name: String,
    default_ttl: Option<Duration>,
    entries: RwLock<HashMap<String, CacheEntry<Value>>>,
}

impl MemoryStore {
    /// Create a named in-memory store with the given default TTL.
    pub fn new(name: impl Into<String>, default_ttl: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            default_ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The session-tier configuration: 30 minute default TTL.
    pub fn session() -> Self {
        Self::new("session", Some(Duration::from_secs(30 * 60)))
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    async fn get_raw(&self, key: &str) -> Option<CacheEntry<Value>> {
        match self.entries.read() {
            Ok(entries) => entries.get(key).cloned(),
            Err(_) => {
                tracing::warn!(store = %self.name, key, "Memory store lock poisoned on read");
                None
            }
        }
    }

    async fn set_raw(&self, key: &str, entry: CacheEntry<Value>) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), entry);
            }
            Err(_) => {
                tracing::warn!(store = %self.name, key, "Memory store lock poisoned on write");
            }
        }
    }

    async fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    async fn keys(&self) -> Vec<String> {
        match self.entries.read() {
            Ok(entries) => entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
