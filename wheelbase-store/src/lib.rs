//! Wheelbase Store - Layered Cache and Vehicle Repository
//!
//! Implements the browser-side caching layer for vehicle listings: keyed
//! stores (in-memory and LMDB-backed), the ordered tier chain with
//! read-through backfill, the sentinel-aware record merger, the repository
//! façade over a remote source, the recently-viewed ledger, and background
//! status polling. Pure data types live in wheelbase-core.

pub mod history;
pub mod keyed;
pub mod lmdb_store;
pub mod merge;
pub mod poll;
pub mod repository;
pub mod tier;

pub use history::{HistoryLedger, HISTORY_KEY};
pub use keyed::{CacheEntry, KeyedStore, KeyedStoreExt, MemoryStore};
pub use lmdb_store::{LmdbStore, LmdbStoreError, StoreStats};
pub use merge::{canonical_field_name, field_default, MergePolicy};
pub use poll::PollRegistry;

// Re-export the repository surface for embedding callers
pub use repository::{
    draft_key, record_key, status_key, GetOptions, RemoteSource, SubscriptionId, SyncStatus,
    VehicleRepository, LIST_KEY,
};
pub use tier::{sweep_task, ChainStats, ChainStatsSnapshot, SweepMetrics, TierChain};
