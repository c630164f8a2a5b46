//! Background status polling.
//!
//! A [`PollRegistry`] keeps at most one polling task per vehicle. Each
//! task wakes on a fixed interval, asks the repository whether the cached
//! record or status has aged out, and forces a refresh only when it has.
//! Stopping is signalled over a watch channel, the same shutdown shape the
//! sweeper uses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use wheelbase_core::VehicleId;

use crate::repository::VehicleRepository;

/// Owns the per-vehicle polling tasks.
pub struct PollRegistry {
    repo: Arc<VehicleRepository>,
    polls: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl PollRegistry {
    pub fn new(repo: Arc<VehicleRepository>) -> Self {
        Self {
            repo,
            polls: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling a vehicle. A poll already running for the same id is
    /// stopped first, so the registry never runs two loops per vehicle.
    pub fn start(&self, id: &VehicleId, interval: Duration) {
        self.stop(id);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        if let Ok(mut polls) = self.polls.lock() {
            polls.insert(id.as_str().to_string(), shutdown_tx);
        }

        let repo = Arc::clone(&self.repo);
        let id = id.clone();
        tokio::spawn(async move {
            tracing::info!(vehicle = %id, interval_ms = interval.as_millis() as u64, "Poll started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh record
            // is not refetched the moment polling starts.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!(vehicle = %id, "Poll stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if repo.refresh_needed(&id).await {
                            if let Err(err) = repo.force_refresh(&id).await {
                                tracing::warn!(vehicle = %id, error = %err, "Poll refresh failed");
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop the poll for a vehicle, if one is running. Returns whether a
    /// poll was stopped.
    pub fn stop(&self, id: &VehicleId) -> bool {
        let Ok(mut polls) = self.polls.lock() else {
            return false;
        };
        match polls.remove(id.as_str()) {
            Some(shutdown_tx) => {
                let _ = shutdown_tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Stop every running poll.
    pub fn stop_all(&self) {
        let Ok(mut polls) = self.polls.lock() else {
            return;
        };
        for (_, shutdown_tx) in polls.drain() {
            let _ = shutdown_tx.send(true);
        }
    }

    pub fn is_polling(&self, id: &VehicleId) -> bool {
        self.polls
            .lock()
            .map(|polls| polls.contains_key(id.as_str()))
            .unwrap_or(false)
    }
}

impl Drop for PollRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

// =============================================================================
// TESTS
// =============================================================================
