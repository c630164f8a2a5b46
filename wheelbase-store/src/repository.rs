//! Vehicle record repository: the façade over tiers, merger, and remote.
//!
//! The repository owns the cache-then-remote read path, the optimistic
//! local write path, and the in-process "record updated" notifications.
//! The backend API is reached only through the [`RemoteSource`] seam, so
//! the whole module is testable against an in-memory remote.
//!
//! Candidate priority for every merge is the workspace-wide order:
//! durable cached copy, then faster cached copies, then the just-fetched
//! remote copy, then the local draft.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use wheelbase_core::{
    CachePolicy, FieldValue, StatusInfo, VehicleId, VehicleRecord, WheelbaseResult,
};

use crate::history::HistoryLedger;
use crate::merge::MergePolicy;
use crate::tier::TierChain;

// ============================================================================
// KEY LAYOUT
// ============================================================================

/// Chain key for a full vehicle record.
pub fn record_key(id: &VehicleId) -> String {
    format!("vehicle:{id}")
}

/// Chain key for the independently-refreshed status sub-record.
pub fn status_key(id: &VehicleId) -> String {
    format!("vehicle_status:{id}")
}

/// Chain key for the local draft of a vehicle.
pub fn draft_key(id: &VehicleId) -> String {
    format!("vehicle_draft:{id}")
}

/// Chain key for the cached listing collection.
pub const LIST_KEY: &str = "vehicle_list";

// ============================================================================
// REMOTE SEAM
// ============================================================================

/// The backend API as the repository sees it, independent of HTTP
/// specifics. Implementations surface [`WheelbaseError::NotFound`] for a
/// 404 equivalent and [`WheelbaseError::Network`] for transport/5xx/auth
/// failures.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch one vehicle record.
    async fn fetch_one(&self, id: &VehicleId) -> WheelbaseResult<VehicleRecord>;

    /// Fetch the listing collection.
    async fn fetch_list(&self) -> WheelbaseResult<Vec<VehicleRecord>>;

    /// Persist a partial field update; returns the server's canonical
    /// merged record.
    async fn save(
        &self,
        id: &VehicleId,
        fields: &BTreeMap<String, FieldValue>,
    ) -> WheelbaseResult<VehicleRecord>;

    /// Fetch the status sub-record.
    async fn fetch_status(&self, id: &VehicleId) -> WheelbaseResult<StatusInfo>;
}

// ============================================================================
// REPOSITORY TYPES
// ============================================================================

/// Options for [`VehicleRepository::get_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Skip the cache-hit fast path and consult the remote source.
    pub force_refresh: bool,
}

/// Remote-sync state of the most recent local `save` for a vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// The remote write is still in flight.
    Pending,
    /// The remote accepted the write.
    Synced,
    /// The remote write failed; the local copy is kept.
    Failed { reason: String },
}

/// Token returned by [`VehicleRepository::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type UpdateCallback = Arc<dyn Fn(&VehicleRecord) + Send + Sync>;
type SubscriberMap = HashMap<String, Vec<(SubscriptionId, UpdateCallback)>>;

/// Invoke every callback registered for `id`. The matching callbacks are
/// snapshotted before the registry lock is released and invoked outside
/// it, so a callback may itself subscribe or unsubscribe. A panicking
/// callback is caught and logged so one bad listener cannot take down the
/// update path.
fn notify_subscribers(subscribers: &RwLock<SubscriberMap>, id: &VehicleId, record: &VehicleRecord) {
    let callbacks = {
        let Ok(subscribers) = subscribers.read() else {
            tracing::warn!(vehicle = %id, "Subscriber registry lock poisoned");
            return;
        };
        subscribers.get(id.as_str()).cloned().unwrap_or_default()
    };
    for (token, callback) in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(record))).is_err() {
            tracing::error!(vehicle = %id, token = token.0, "Record-updated callback panicked");
        }
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

/// Façade combining the tier chain, the merger, and the remote source.
pub struct VehicleRepository {
    chain: Arc<TierChain>,
    remote: Arc<dyn RemoteSource>,
    policy: CachePolicy,
    merger: MergePolicy,
    history: HistoryLedger,
    subscribers: Arc<RwLock<SubscriberMap>>,
    next_token: AtomicU64,
    /// Per-id locks that coalesce overlapping remote fetches.
    flights: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    sync: Arc<RwLock<HashMap<String, SyncStatus>>>,
}

impl VehicleRepository {
    /// Build a repository over an explicitly constructed tier chain and
    /// remote source. Nothing here is global: tests construct hermetic
    /// instances.
    pub fn new(chain: Arc<TierChain>, remote: Arc<dyn RemoteSource>, policy: CachePolicy) -> Self {
        let merger = MergePolicy::from_policy(&policy);
        let history = HistoryLedger::new(Arc::clone(&chain), policy.history_capacity);
        Self {
            chain,
            remote,
            policy,
            merger,
            history,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_token: AtomicU64::new(1),
            flights: AsyncMutex::new(HashMap::new()),
            sync: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The recently-viewed ledger.
    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }

    /// Get a record, serving a cache hit directly.
    pub async fn get(&self, id: &VehicleId) -> WheelbaseResult<VehicleRecord> {
        self.get_with(id, GetOptions::default()).await
    }

    /// Get a record with explicit options.
    ///
    /// Default path: a live cache hit is returned as-is; it is already a
    /// finalized record, immediately valid for rendering. On a miss (or
    /// with `force_refresh`) the remote source is consulted under a per-id
    /// single-flight lock; the result is merged against every cached copy
    /// and the draft, written back to all tiers, appended to the history
    /// ledger, and announced to subscribers.
    ///
    /// On a network failure the best available cached data is served
    /// instead (degraded read); the error surfaces only when no tier has
    /// anything.
    pub async fn get_with(&self, id: &VehicleId, opts: GetOptions) -> WheelbaseResult<VehicleRecord> {
        let key = record_key(id);
        if !opts.force_refresh {
            if let Some(entry) = self.chain.read::<VehicleRecord>(&key).await {
                return Ok(entry.data);
            }
        }

        let flight = self.flight_lock(id).await;
        let _guard = flight.lock().await;

        // A coalesced caller may have warmed the cache while we waited.
        if !opts.force_refresh {
            if let Some(entry) = self.chain.read::<VehicleRecord>(&key).await {
                return Ok(entry.data);
            }
        }

        match self.remote.fetch_one(id).await {
            Ok(remote_record) => {
                let mut candidates = self.cached_candidates(id).await;
                candidates.push(remote_record);
                if let Some(draft) = self.chain.read::<VehicleRecord>(&draft_key(id)).await {
                    candidates.push(draft.data);
                }

                let merged = self.merger.merge(&candidates);
                self.chain.write(&key, &merged, None).await;
                self.history.record(id, merged.summary()).await;
                notify_subscribers(&self.subscribers, id, &merged);
                Ok(merged)
            }
            Err(err) if err.is_network() => {
                let mut candidates = self.cached_candidates(id).await;
                if let Some(draft) = self.chain.read::<VehicleRecord>(&draft_key(id)).await {
                    candidates.push(draft.data);
                }
                if candidates.is_empty() {
                    Err(err)
                } else {
                    tracing::warn!(vehicle = %id, error = %err, "Remote fetch failed, serving cached copy");
                    Ok(self.merger.merge(&candidates))
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Get the cached listing collection, fetching it on a miss.
    ///
    /// List entries may be summaries; they are not merged against
    /// individually cached full records. The listing is cached under the
    /// record max-age so it expires out of the durable tier too, instead
    /// of pinning a one-shot fetch forever.
    pub async fn list(&self) -> WheelbaseResult<Vec<VehicleRecord>> {
        if let Some(entry) = self.chain.read::<Vec<VehicleRecord>>(LIST_KEY).await {
            return Ok(entry.data);
        }
        match self.remote.fetch_list().await {
            Ok(records) => {
                self.chain
                    .write(LIST_KEY, &records, Some(self.policy.record_max_age))
                    .await;
                Ok(records)
            }
            Err(err) => Err(err),
        }
    }

    /// Optimistic local write.
    ///
    /// The partial fields win over whatever is cached, the merged record is
    /// written to every tier (and kept as the draft), and subscribers are
    /// notified before any network traffic happens. The remote write runs
    /// fire-and-forget; its outcome is visible through [`Self::sync_status`]
    /// and never fails this call.
    pub async fn save(
        &self,
        id: &VehicleId,
        fields: BTreeMap<String, FieldValue>,
    ) -> VehicleRecord {
        let mut partial = VehicleRecord::stub(id.clone());
        partial.fields = fields.clone();

        let mut candidates = vec![partial];
        candidates.extend(self.cached_candidates(id).await);
        let merged = self.merger.merge(&candidates);

        self.chain.write(&record_key(id), &merged, None).await;
        self.chain.write(&draft_key(id), &merged, None).await;
        self.set_sync(id, SyncStatus::Pending);
        notify_subscribers(&self.subscribers, id, &merged);

        let remote = Arc::clone(&self.remote);
        let chain = Arc::clone(&self.chain);
        let merger = self.merger.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let sync = Arc::clone(&self.sync);
        let id = id.clone();
        let local = merged.clone();
        tokio::spawn(async move {
            match remote.save(&id, &fields).await {
                Ok(canonical) => {
                    // The server's canonical result wins field-by-field,
                    // but it cannot regress locally-known fields to
                    // sentinels.
                    let reconciled = merger.merge(&[canonical, local]);
                    chain.write(&record_key(&id), &reconciled, None).await;
                    chain.remove(&draft_key(&id)).await;
                    notify_subscribers(&subscribers, &id, &reconciled);
                    // Status flips last so an observer of `Synced` sees the
                    // reconciled record and notification already done.
                    if let Ok(mut sync) = sync.write() {
                        sync.insert(id.as_str().to_string(), SyncStatus::Synced);
                    }
                }
                Err(err) => {
                    tracing::warn!(vehicle = %id, error = %err, "Remote save failed, keeping local write");
                    if let Ok(mut sync) = sync.write() {
                        sync.insert(
                            id.as_str().to_string(),
                            SyncStatus::Failed {
                                reason: err.to_string(),
                            },
                        );
                    }
                }
            }
        });

        merged
    }

    /// Remote-sync state of the most recent `save` for this vehicle, if
    /// one has happened.
    pub fn sync_status(&self, id: &VehicleId) -> Option<SyncStatus> {
        self.sync
            .read()
            .ok()
            .and_then(|sync| sync.get(id.as_str()).cloned())
    }

    /// Remove the record, status, and draft from every tier, along with
    /// the per-id bookkeeping (flight lock, sync state), so invalidated
    /// ids do not accumulate.
    ///
    /// The next `get` misses and goes to the remote source.
    pub async fn invalidate(&self, id: &VehicleId) {
        self.chain.remove(&record_key(id)).await;
        self.chain.remove(&status_key(id)).await;
        self.chain.remove(&draft_key(id)).await;
        self.flights.lock().await.remove(id.as_str());
        if let Ok(mut sync) = self.sync.write() {
            sync.remove(id.as_str());
        }
    }

    /// Refresh from the remote source, clearing the status sub-record
    /// cache first since status changes independently and more often.
    pub async fn force_refresh(&self, id: &VehicleId) -> WheelbaseResult<VehicleRecord> {
        self.chain.remove(&status_key(id)).await;
        self.get_with(
            id,
            GetOptions {
                force_refresh: true,
            },
        )
        .await
    }

    /// Get the status sub-record, cached under its own short max-age.
    ///
    /// A fresh status also updates the cached full record's `status_info`
    /// so renders stay coherent.
    pub async fn get_status(&self, id: &VehicleId) -> WheelbaseResult<StatusInfo> {
        let key = status_key(id);
        if let Some(entry) = self.chain.read::<StatusInfo>(&key).await {
            if entry.age() <= self.policy.status_max_age {
                return Ok(entry.data);
            }
        }
        match self.remote.fetch_status(id).await {
            Ok(status) => {
                self.chain
                    .write(&key, &status, Some(self.policy.status_max_age))
                    .await;
                if let Some(entry) = self.chain.read::<VehicleRecord>(&record_key(id)).await {
                    let mut record = entry.data;
                    record.status_info = Some(status.clone());
                    self.chain.write(&record_key(id), &record, None).await;
                    notify_subscribers(&self.subscribers, id, &record);
                }
                Ok(status)
            }
            Err(err) if err.is_network() => {
                if let Some(entry) = self.chain.read::<StatusInfo>(&key).await {
                    tracing::warn!(vehicle = %id, error = %err, "Status fetch failed, serving cached status");
                    Ok(entry.data)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Staleness probe for polling callers.
    ///
    /// True when the cached record is older than the record max-age, the
    /// status sub-record is older than the status max-age, or either is
    /// absent.
    pub async fn refresh_needed(&self, id: &VehicleId) -> bool {
        let record_fresh = self
            .chain
            .read::<VehicleRecord>(&record_key(id))
            .await
            .map(|entry| entry.age() <= self.policy.record_max_age)
            .unwrap_or(false);
        let status_fresh = self
            .chain
            .read::<StatusInfo>(&status_key(id))
            .await
            .map(|entry| entry.age() <= self.policy.status_max_age)
            .unwrap_or(false);
        !(record_fresh && status_fresh)
    }

    /// Register a callback invoked whenever this vehicle's record is
    /// updated by `save`, a successful remote merge in `get`, or
    /// `force_refresh`. Callbacks run synchronously and in-process.
    pub fn subscribe<F>(&self, id: &VehicleId, callback: F) -> SubscriptionId
    where
        F: Fn(&VehicleRecord) + Send + Sync + 'static,
    {
        let token = SubscriptionId(self.next_token.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers
                .entry(id.as_str().to_string())
                .or_default()
                .push((token, Arc::new(callback) as UpdateCallback));
        }
        token
    }

    /// Remove a previously registered callback. Returns whether anything
    /// was removed.
    pub fn unsubscribe(&self, id: &VehicleId, token: SubscriptionId) -> bool {
        let Ok(mut subscribers) = self.subscribers.write() else {
            return false;
        };
        let Some(callbacks) = subscribers.get_mut(id.as_str()) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(t, _)| *t != token);
        before != callbacks.len()
    }

    /// Every live cached copy of the record, slowest (durable) tier first.
    async fn cached_candidates(&self, id: &VehicleId) -> Vec<VehicleRecord> {
        let mut entries = self
            .chain
            .collect::<VehicleRecord>(&record_key(id))
            .await;
        entries.reverse();
        entries.into_iter().map(|entry| entry.data).collect()
    }

    async fn flight_lock(&self, id: &VehicleId) -> Arc<AsyncMutex<()>> {
        let mut flights = self.flights.lock().await;
        flights
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn set_sync(&self, id: &VehicleId, status: SyncStatus) {
        if let Ok(mut sync) = self.sync.write() {
            sync.insert(id.as_str().to_string(), status);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
