//! Ordered cache tier chain with read-through and write-through semantics.
//!
//! Tiers are [`KeyedStore`]s ordered fastest/most-volatile first. Reads try
//! tiers in order and backfill the faster tiers behind the caller's back;
//! writes go to every tier. Because each store is best-effort, a dead tier
//! degrades the chain instead of breaking it: with every backend disabled
//! the chain simply behaves as permanently empty.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::keyed::{CacheEntry, KeyedStore};

/// Hit/miss/backfill counters for the chain.
#[derive(Debug, Default)]
pub struct ChainStats {
    hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
}

/// Snapshot of chain counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub backfills: u64,
}

impl ChainStats {
    fn snapshot(&self) -> ChainStatsSnapshot {
        ChainStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
        }
    }
}

/// An ordered chain of cache tiers, fastest first.
pub struct TierChain {
    tiers: Vec<Arc<dyn KeyedStore>>,
    stats: ChainStats,
}

impl TierChain {
    /// Build a chain from tiers ordered fastest/most-volatile first.
    pub fn new(tiers: Vec<Arc<dyn KeyedStore>>) -> Self {
        Self {
            tiers,
            stats: ChainStats::default(),
        }
    }

    /// Number of tiers in the chain.
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Current counters.
    pub fn stats(&self) -> ChainStatsSnapshot {
        self.stats.snapshot()
    }

    /// Read through the chain.
    ///
    /// Scans tiers in order; the first live hit wins. Expired or garbled
    /// entries are dropped from their tier and the scan continues. On a hit
    /// in a slower tier the faster tiers are backfilled asynchronously
    /// (write-behind), each with its own default TTL.
    pub async fn read<T>(&self, key: &str) -> Option<CacheEntry<T>>
    where
        T: DeserializeOwned + Send,
    {
        for (index, tier) in self.tiers.iter().enumerate() {
            let Some(entry) = tier.get_raw(key).await else {
                continue;
            };
            if entry.is_expired() {
                tier.remove(key).await;
                continue;
            }
            match serde_json::from_value::<T>(entry.data.clone()) {
                Ok(data) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    if index > 0 {
                        self.stats.backfills.fetch_add(1, Ordering::Relaxed);
                        self.backfill(key, entry.data.clone(), index);
                    }
                    return Some(CacheEntry {
                        data,
                        created_at: entry.created_at,
                        expires_at: entry.expires_at,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        store = tier.name(),
                        key,
                        error = %e,
                        "Discarding undeserializable tier entry"
                    );
                    tier.remove(key).await;
                }
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Read the same key from every tier without backfilling.
    ///
    /// Returns live entries in tier order, fastest first. Used by the
    /// repository to assemble merge candidates, where each tier's copy
    /// competes separately.
    pub async fn collect<T>(&self, key: &str) -> Vec<CacheEntry<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut entries = Vec::new();
        for tier in &self.tiers {
            let Some(entry) = tier.get_raw(key).await else {
                continue;
            };
            if entry.is_expired() {
                tier.remove(key).await;
                continue;
            }
            if let Ok(data) = serde_json::from_value::<T>(entry.data.clone()) {
                entries.push(CacheEntry {
                    data,
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                });
            }
        }
        entries
    }

    /// Write through to every tier.
    ///
    /// Each tier's write is best-effort; one tier failing never blocks the
    /// others. `ttl` of `None` lets each tier apply its own default.
    pub async fn write<T>(&self, key: &str, data: &T, ttl: Option<Duration>)
    where
        T: Serialize + Sync,
    {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to serialize value for tier write");
                return;
            }
        };
        for tier in &self.tiers {
            let ttl = ttl.or_else(|| tier.default_ttl());
            tier.set_raw(key, CacheEntry::fresh(value.clone(), ttl)).await;
        }
    }

    /// Remove a key from every tier.
    pub async fn remove(&self, key: &str) {
        for tier in &self.tiers {
            tier.remove(key).await;
        }
    }

    /// Remove already-expired entries from every tier.
    ///
    /// Safe to run concurrently with reads and writes: it only touches
    /// entries that are already misses.
    pub async fn sweep(&self) -> u64 {
        let mut swept = 0;
        for tier in &self.tiers {
            for key in tier.keys().await {
                if let Some(entry) = tier.get_raw(&key).await {
                    if entry.is_expired() {
                        tier.remove(&key).await;
                        swept += 1;
                    }
                }
            }
        }
        swept
    }

    fn backfill(&self, key: &str, value: Value, up_to: usize) {
        let faster: Vec<Arc<dyn KeyedStore>> = self.tiers[..up_to].to_vec();
        let key = key.to_string();
        tokio::spawn(async move {
            for tier in faster {
                let ttl = tier.default_ttl();
                tier.set_raw(&key, CacheEntry::fresh(value.clone(), ttl)).await;
            }
        });
    }
}

// ============================================================================
// BACKGROUND SWEEP
// ============================================================================

/// Counters collected by the background sweep task.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Sweep cycles completed since startup.
    pub cycles: AtomicU64,
    /// Expired entries removed since startup.
    pub entries_swept: AtomicU64,
}

/// Background task that periodically sweeps expired entries.
///
/// Runs until the shutdown signal is received. Sweeping never blocks
/// foreground reads or writes; it only removes entries that already count
/// as misses.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(sweep_task(chain, Duration::from_secs(300), shutdown_rx));
/// // Later:
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await.unwrap();
/// ```
pub async fn sweep_task(
    chain: Arc<TierChain>,
    sweep_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::default());

    let mut ticker = interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = sweep_interval.as_secs(),
        tiers = chain.tier_count(),
        "Expiry sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Expiry sweep task shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                let swept = chain.sweep().await;
                metrics.cycles.fetch_add(1, Ordering::Relaxed);
                metrics.entries_swept.fetch_add(swept, Ordering::Relaxed);
                if swept > 0 {
                    tracing::debug!(swept, "Expiry sweep removed entries");
                }
            }
        }
    }

    metrics
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyed::{KeyedStoreExt, MemoryStore};
    use async_trait::async_trait;

    fn two_tier_chain() -> (Arc<MemoryStore>, Arc<MemoryStore>, TierChain) {
        let fast = Arc::new(MemoryStore::new("fast", Some(Duration::from_secs(60))));
        let slow = Arc::new(MemoryStore::new("slow", None));
        let chain = TierChain::new(vec![
            fast.clone() as Arc<dyn KeyedStore>,
            slow.clone() as Arc<dyn KeyedStore>,
        ]);
        (fast, slow, chain)
    }

    /// A tier whose writes silently fail and whose reads always miss, like
    /// disabled browser storage.
    struct BrokenStore;

    #[async_trait]
    impl KeyedStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        fn default_ttl(&self) -> Option<Duration> {
            None
        }
        async fn get_raw(&self, _key: &str) -> Option<CacheEntry<Value>> {
            None
        }
        async fn set_raw(&self, _key: &str, _entry: CacheEntry<Value>) {}
        async fn remove(&self, _key: &str) {}
        async fn keys(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_write_reaches_every_tier() {
        let (fast, slow, chain) = two_tier_chain();
        chain.write("k1", &7u32, None).await;

        assert_eq!(fast.get::<u32>("k1").await.map(|e| e.data), Some(7));
        assert_eq!(slow.get::<u32>("k1").await.map(|e| e.data), Some(7));
    }

    #[tokio::test]
    async fn test_read_prefers_fast_tier() {
        let (fast, slow, chain) = two_tier_chain();
        fast.set("k1", &1u32, None).await;
        slow.set("k1", &2u32, None).await;

        let entry = chain.read::<u32>("k1").await.expect("hit expected");
        assert_eq!(entry.data, 1);
        assert_eq!(chain.stats().hits, 1);
        assert_eq!(chain.stats().backfills, 0);
    }

    #[tokio::test]
    async fn test_slow_hit_backfills_fast_tier() {
        let (fast, slow, chain) = two_tier_chain();
        slow.set("k1", &9u32, None).await;

        let entry = chain.read::<u32>("k1").await.expect("hit expected");
        assert_eq!(entry.data, 9);
        assert_eq!(chain.stats().backfills, 1);

        // The backfill runs as a spawned task; yield until it lands.
        for _ in 0..50 {
            if fast.get::<u32>("k1").await.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let backfilled = fast.get::<u32>("k1").await.expect("backfill expected");
        assert_eq!(backfilled.data, 9);
        // The fast tier applied its own default TTL.
        assert!(backfilled.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_full_miss() {
        let (_fast, _slow, chain) = two_tier_chain();
        assert!(chain.read::<u32>("absent").await.is_none());
        assert_eq!(chain.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_fast_entry_falls_through_to_slow() {
        let (fast, slow, chain) = two_tier_chain();
        fast.set("k1", &1u32, Some(Duration::ZERO)).await;
        slow.set("k1", &2u32, None).await;

        let entry = chain.read::<u32>("k1").await.expect("hit expected");
        assert_eq!(entry.data, 2);
        // The expired fast entry was dropped during the scan.
        assert!(fast.get_raw("k1").await.map(|e| e.data != serde_json::json!(1)).unwrap_or(true));
    }

    #[tokio::test]
    async fn test_collect_returns_all_live_copies_in_tier_order() {
        let (fast, slow, chain) = two_tier_chain();
        fast.set("k1", &1u32, None).await;
        slow.set("k1", &2u32, None).await;

        let entries = chain.collect::<u32>("k1").await;
        assert_eq!(entries.iter().map(|e| e.data).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_remove_clears_every_tier() {
        let (fast, slow, chain) = two_tier_chain();
        chain.write("k1", &7u32, None).await;
        chain.remove("k1").await;

        assert!(fast.get::<u32>("k1").await.is_none());
        assert!(slow.get::<u32>("k1").await.is_none());
    }

    #[tokio::test]
    async fn test_broken_tier_degrades_gracefully() {
        let slow = Arc::new(MemoryStore::new("slow", None));
        let chain = TierChain::new(vec![Arc::new(BrokenStore) as Arc<dyn KeyedStore>, slow.clone()]);

        chain.write("k1", &7u32, None).await;
        let entry = chain.read::<u32>("k1").await.expect("slow tier should serve");
        assert_eq!(entry.data, 7);
    }

    #[tokio::test]
    async fn test_all_tiers_broken_behaves_as_empty() {
        let chain = TierChain::new(vec![Arc::new(BrokenStore) as Arc<dyn KeyedStore>]);
        chain.write("k1", &7u32, None).await;
        assert!(chain.read::<u32>("k1").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (fast, _slow, chain) = two_tier_chain();
        fast.set("dead", &1u32, Some(Duration::ZERO)).await;
        fast.set("live", &2u32, Some(Duration::from_secs(3600))).await;

        let swept = chain.sweep().await;
        assert_eq!(swept, 1);
        assert!(fast.get::<u32>("live").await.is_some());
        assert!(fast.get::<u32>("dead").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_task_runs_and_shuts_down() {
        let fast = Arc::new(MemoryStore::new("fast", None));
        fast.set("dead", &1u32, Some(Duration::ZERO)).await;
        let chain = Arc::new(TierChain::new(vec![fast.clone() as Arc<dyn KeyedStore>]));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_task(
            chain,
            Duration::from_millis(10),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).expect("send should succeed");
        let metrics = handle.await.expect("task should join");

        assert!(metrics.cycles.load(Ordering::Relaxed) >= 1);
        assert_eq!(metrics.entries_swept.load(Ordering::Relaxed), 1);
        assert!(fast.keys().await.is_empty());
    }
}
