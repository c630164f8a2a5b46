//! Core record structures for vehicle listings.

use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// IDENTITY
// ============================================================================

/// Backend-assigned vehicle identifier.
///
/// Identifiers are opaque strings minted by the marketplace API; the client
/// never fabricates them. The newtype keeps vehicle ids from being confused
/// with arbitrary cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    /// Wrap a backend-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VehicleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// FIELD VALUES
// ============================================================================

/// A single listing field value as it arrives from the API or a form.
///
/// Listing fields are free-form JSON scalars (`brand`, `kms_driven`,
/// `price`, ...), so the representation mirrors JSON rather than a closed
/// schema. Whether a value counts as "missing" is a merge-policy concern,
/// not a property of the value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Textual value.
    Text(String),
    /// Numeric value (prices, odometer readings, years).
    Number(f64),
    /// Boolean value.
    Flag(bool),
    /// Explicit null from the API.
    Null,
}

impl FieldValue {
    /// Borrow the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the numeric content, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// True for the explicit null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// Listing status sub-record.
///
/// Refreshed independently of (and more often than) the rest of the record,
/// since a listing moves through inspection/negotiation states while the
/// vehicle details stay put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: String,
    pub status_display: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
}

/// One sell-listing/vehicle entity as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub id: VehicleId,
    /// Open field map: `brand`, `model`, `registration_number`,
    /// `kms_driven`, `price`, `contact_number`, ...
    pub fields: BTreeMap<String, FieldValue>,
    /// Photo slot name (`front`, `back`, ...) to URL.
    pub photo_urls: BTreeMap<String, String>,
    /// Document slot name (`rc`, `insurance`, ...) to URL.
    pub document_urls: BTreeMap<String, String>,
    pub status_info: Option<StatusInfo>,
    /// Most recent write from any source: remote fetch, local edit, or merge.
    pub last_updated: Timestamp,
}

impl VehicleRecord {
    /// Empty stub for a listing that only exists locally so far, e.g. right
    /// after form submission while the server response is pending.
    pub fn stub(id: VehicleId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            photo_urls: BTreeMap::new(),
            document_urls: BTreeMap::new(),
            status_info: None,
            last_updated: Utc::now(),
        }
    }

    /// Look up a field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Set a field value, bumping `last_updated`.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
        self.last_updated = Utc::now();
    }

    /// Project the summary shown in "recently viewed" lists.
    pub fn summary(&self) -> VehicleSummary {
        let text = |name: &str| {
            self.fields
                .get(name)
                .and_then(|v| v.as_text())
                .map(str::to_string)
        };
        VehicleSummary {
            brand: text("brand"),
            model: text("model"),
            year: self.fields.get("year").and_then(|v| v.as_number()),
            registration_number: text("registration_number"),
            price: self.fields.get("price").and_then(|v| v.as_number()),
            thumbnail: self.photo_urls.get("front").cloned(),
            status: self.status_info.as_ref().map(|s| s.status.clone()),
        }
    }
}

/// Compact listing summary carried by history entries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleSummary {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<f64>,
    pub registration_number: Option<String>,
    pub price: Option<f64>,
    pub thumbnail: Option<String>,
    pub status: Option<String>,
}

/// One entry in the recently-viewed ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub vehicle_id: VehicleId,
    pub viewed_at: Timestamp,
    pub summary: VehicleSummary,
}

// =============================================================================
// TESTS
// =============================================================================
