//! Bounded ledger of recently viewed listings.
//!
//! A single chain key holds the whole ledger: a timestamp-ordered list with
//! at most one entry per vehicle and a configured capacity. Writes are
//! best-effort; a failed store write never fails the view that triggered
//! it.

use chrono::Utc;
use std::sync::Arc;
use wheelbase_core::{HistoryEntry, VehicleId, VehicleSummary};

use crate::tier::TierChain;

/// Chain key under which the ledger is stored.
pub const HISTORY_KEY: &str = "history";

/// Bounded, newest-first ledger of viewed/submitted listings.
pub struct HistoryLedger {
    chain: Arc<TierChain>,
    capacity: usize,
}

impl HistoryLedger {
    /// Create a ledger over the given chain, retaining at most `capacity`
    /// entries.
    pub fn new(chain: Arc<TierChain>, capacity: usize) -> Self {
        Self { chain, capacity }
    }

    /// Configured maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Upsert a view of a vehicle.
    ///
    /// An existing entry for the same vehicle is replaced (new timestamp
    /// and summary) rather than duplicated. Oldest entries are evicted once
    /// the ledger exceeds capacity.
    pub async fn record(&self, vehicle_id: &VehicleId, summary: VehicleSummary) {
        let mut entries = self
            .chain
            .read::<Vec<HistoryEntry>>(HISTORY_KEY)
            .await
            .map(|entry| entry.data)
            .unwrap_or_default();

        entries.retain(|entry| &entry.vehicle_id != vehicle_id);
        entries.push(HistoryEntry {
            vehicle_id: vehicle_id.clone(),
            viewed_at: Utc::now(),
            summary,
        });

        entries.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        entries.truncate(self.capacity);

        self.chain.write(HISTORY_KEY, &entries, None).await;
    }

    /// Up to `limit` entries, newest first.
    pub async fn list(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut entries = self
            .chain
            .read::<Vec<HistoryEntry>>(HISTORY_KEY)
            .await
            .map(|entry| entry.data)
            .unwrap_or_default();
        entries.truncate(limit);
        entries
    }

    /// Drop the whole ledger.
    pub async fn clear(&self) {
        self.chain.remove(HISTORY_KEY).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================
