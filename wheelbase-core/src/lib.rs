//! Wheelbase Core - Marketplace Data Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types, errors, and configuration - no
//! business logic and no I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod record;

pub use config::CachePolicy;
pub use error::{ConfigError, StorageError, WheelbaseError, WheelbaseResult};
pub use record::{
    FieldValue, HistoryEntry, StatusInfo, VehicleId, VehicleRecord, VehicleSummary,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
