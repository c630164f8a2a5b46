//! Cache policy configuration.

use crate::error::ConfigError;
use std::time::Duration;

/// Default TTL for entries in volatile/session-like tiers.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;
/// Default maximum age before a full record counts as stale.
pub const DEFAULT_RECORD_MAX_AGE_SECS: u64 = 60 * 60;
/// Default maximum age before a status sub-record counts as stale.
pub const DEFAULT_STATUS_MAX_AGE_SECS: u64 = 5 * 60;
/// Default bound on the recently-viewed ledger.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;
/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Sentinel strings the backend emits in place of a proper "unset" value.
pub const DEFAULT_SENTINELS: &[&str] = &["Unknown", "Not Available", "Not Specified"];

/// Tuning knobs for the cache tiers, the repository, and the merger.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Default TTL for volatile-tier entries when the caller passes none.
    pub session_ttl: Duration,
    /// Staleness threshold for full records (`refresh_needed`).
    pub record_max_age: Duration,
    /// Staleness threshold for the independently-refreshed status sub-record.
    pub status_max_age: Duration,
    /// Maximum number of recently-viewed entries retained.
    pub history_capacity: usize,
    /// How often the background sweep removes expired entries.
    pub sweep_interval: Duration,
    /// Values the merger treats as "unset" regardless of which copy they
    /// came from.
    pub sentinels: Vec<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            record_max_age: Duration::from_secs(DEFAULT_RECORD_MAX_AGE_SECS),
            status_max_age: Duration::from_secs(DEFAULT_STATUS_MAX_AGE_SECS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            sentinels: DEFAULT_SENTINELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CachePolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the volatile-tier default TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Set the full-record staleness threshold.
    pub fn with_record_max_age(mut self, age: Duration) -> Self {
        self.record_max_age = age;
        self
    }

    /// Set the status sub-record staleness threshold.
    pub fn with_status_max_age(mut self, age: Duration) -> Self {
        self.status_max_age = age;
        self
    }

    /// Set the recently-viewed ledger bound.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set the background sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Replace the sentinel set.
    pub fn with_sentinels<I, S>(mut self, sentinels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sentinels = sentinels.into_iter().map(Into::into).collect();
        self
    }

    /// Create a policy from environment variables.
    ///
    /// # Environment Variables
    /// - `WHEELBASE_SESSION_TTL_SECS`: volatile-tier default TTL (default: 1800)
    /// - `WHEELBASE_RECORD_MAX_AGE_SECS`: record staleness threshold (default: 3600)
    /// - `WHEELBASE_STATUS_MAX_AGE_SECS`: status staleness threshold (default: 300)
    /// - `WHEELBASE_HISTORY_CAPACITY`: recently-viewed bound (default: 20)
    /// - `WHEELBASE_SWEEP_INTERVAL_SECS`: expiry sweep interval (default: 300)
    pub fn from_env() -> Self {
        fn secs(var: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(var)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default),
            )
        }

        let history_capacity = std::env::var("WHEELBASE_HISTORY_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HISTORY_CAPACITY);

        Self {
            session_ttl: secs("WHEELBASE_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS),
            record_max_age: secs("WHEELBASE_RECORD_MAX_AGE_SECS", DEFAULT_RECORD_MAX_AGE_SECS),
            status_max_age: secs("WHEELBASE_STATUS_MAX_AGE_SECS", DEFAULT_STATUS_MAX_AGE_SECS),
            history_capacity,
            sweep_interval: secs("WHEELBASE_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS),
            sentinels: DEFAULT_SENTINELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check the policy for values that would misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.status_max_age > self.record_max_age {
            return Err(ConfigError::InvalidValue {
                field: "status_max_age".to_string(),
                value: format!("{:?}", self.status_max_age),
                reason: "status refreshes more often than full records".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
