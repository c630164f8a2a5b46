//! Error types for Wheelbase operations

use crate::record::VehicleId;
use thiserror::Error;

/// Storage layer errors.
///
/// These never escape the cache tiers: every backend failure is absorbed at
/// the store boundary and logged, degrading the operation to a cache miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Backend error: {reason}")]
    Backend { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Wheelbase errors.
///
/// `NotFound` and `Network` are the only remote-facing failures the
/// repository surfaces to callers; merge-conflict observations are logged,
/// never raised.
#[derive(Debug, Clone, Error)]
pub enum WheelbaseError {
    #[error("Vehicle not found: {id}")]
    NotFound { id: VehicleId },

    #[error("Remote call failed: {reason}")]
    Network { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl WheelbaseError {
    /// True for the not-found variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for transport/5xx/auth failures.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Result type alias for Wheelbase operations.
pub type WheelbaseResult<T> = Result<T, WheelbaseError>;

// =============================================================================
// TESTS
// =============================================================================
