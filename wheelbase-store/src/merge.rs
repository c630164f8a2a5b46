//! Field-priority record reconciliation.
//!
//! Several partial copies of the same listing coexist: the durable cached
//! copy, the session-tier copy, the just-fetched remote copy, and a local
//! draft. [`MergePolicy::merge`] combines them into one record, field by
//! field, taking the first value that is actually populated. The backend's
//! placeholder strings (`"Unknown"`, `"Not Available"`, ...) count as
//! unset, so a populated field can never regress to a sentinel.
//!
//! This is the single merge implementation for the whole workspace; the
//! candidate priority order is decided by the caller, highest first.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use wheelbase_core::{CachePolicy, FieldValue, StatusInfo, VehicleId, VehicleRecord};

/// Field spellings the backend and older form code use interchangeably,
/// mapped to the canonical name. Resolved centrally here instead of at
/// every call site.
static FIELD_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("kilometers_driven", "kms_driven"),
        ("km_driven", "kms_driven"),
        ("reg_no", "registration_number"),
        ("registration_no", "registration_number"),
        ("vehicle_number", "registration_number"),
        ("phone", "contact_number"),
        ("mobile", "contact_number"),
        ("mobile_number", "contact_number"),
        ("make", "brand"),
    ])
});

/// Numeric fields where `0` is a placeholder, not a value.
const ZERO_IS_MISSING: &[&str] = &["price", "kms_driven", "year", "mileage"];

/// Resolve a field name to its canonical spelling.
pub fn canonical_field_name(name: &str) -> &str {
    FIELD_ALIASES.get(name).copied().unwrap_or(name)
}

/// Fallback value for a field no candidate could fill.
pub fn field_default(field: &str) -> Option<FieldValue> {
    match field {
        "year" => {
            use chrono::Datelike;
            Some(FieldValue::Number(f64::from(chrono::Utc::now().year())))
        }
        "price" | "kms_driven" => Some(FieldValue::Number(0.0)),
        _ => None,
    }
}

/// Sentinel-aware merge policy.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    sentinels: HashSet<String>,
}

impl MergePolicy {
    /// Build a policy with an explicit sentinel set.
    pub fn new<I, S>(sentinels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sentinels: sentinels.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a policy from the workspace cache policy.
    pub fn from_policy(policy: &CachePolicy) -> Self {
        Self::new(policy.sentinels.iter().cloned())
    }

    /// Whether a value counts as populated for the given canonical field.
    pub fn acceptable(&self, field: &str, value: &FieldValue) -> bool {
        match value {
            FieldValue::Null => false,
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                !trimmed.is_empty() && !self.sentinels.contains(trimmed)
            }
            FieldValue::Number(n) => *n != 0.0 || !ZERO_IS_MISSING.contains(&field),
            FieldValue::Flag(_) => true,
        }
    }

    /// Whether a URL slot value counts as populated.
    fn acceptable_url(&self, url: &str) -> bool {
        let trimmed = url.trim();
        !trimmed.is_empty() && !self.sentinels.contains(trimmed)
    }

    /// Combine partial copies of one logical record, highest priority first.
    ///
    /// Pure with respect to I/O: candidates in, merged record out. For each
    /// field the first acceptable value wins; fields nobody populated fall
    /// back to the per-field default (current year for `year`, `0` for
    /// `price` and `kms_driven`) or are dropped. Photo and document maps
    /// merge per slot under the same rule. `last_updated` is the newest
    /// across candidates.
    pub fn merge(&self, candidates: &[VehicleRecord]) -> VehicleRecord {
        let id = candidates
            .iter()
            .map(|c| &c.id)
            .find(|id| !id.as_str().is_empty())
            .cloned()
            .unwrap_or_else(|| VehicleId::new(""));

        // Canonicalize each candidate's field map first so aliases compete
        // with their canonical spelling inside a single candidate too.
        let canonical: Vec<BTreeMap<&str, &FieldValue>> = candidates
            .iter()
            .map(|c| {
                let mut map: BTreeMap<&str, &FieldValue> = BTreeMap::new();
                for (name, value) in &c.fields {
                    let canon = canonical_field_name(name);
                    let claim = match map.get(canon).copied() {
                        None => true,
                        // The canonically-named field owns its slot
                        // regardless of map iteration order; an alias only
                        // stands in while the slot holds nothing acceptable.
                        Some(existing) if name == canon => {
                            self.acceptable(canon, value) || !self.acceptable(canon, existing)
                        }
                        Some(existing) => !self.acceptable(canon, existing),
                    };
                    if claim {
                        map.insert(canon, value);
                    }
                }
                map
            })
            .collect();

        let all_fields: BTreeSet<&str> = canonical.iter().flat_map(|m| m.keys().copied()).collect();

        let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();
        for field in all_fields {
            let mut rejected: Option<&FieldValue> = None;
            let mut winner: Option<&FieldValue> = None;
            for map in &canonical {
                match map.get(field).copied() {
                    Some(value) if self.acceptable(field, value) => {
                        winner = Some(value);
                        break;
                    }
                    Some(value) => rejected = rejected.or(Some(value)),
                    None => {}
                }
            }
            match winner {
                Some(value) => {
                    if let Some(rejected) = rejected {
                        tracing::debug!(
                            field,
                            kept = ?value,
                            rejected = ?rejected,
                            "Sentinel filtering resolved a field conflict"
                        );
                    }
                    fields.insert(field.to_string(), value.clone());
                }
                None => {
                    if let Some(default) = field_default(field) {
                        fields.insert(field.to_string(), default);
                    }
                }
            }
        }

        let photo_urls = self.merge_url_map(candidates.iter().map(|c| &c.photo_urls));
        let document_urls = self.merge_url_map(candidates.iter().map(|c| &c.document_urls));

        let status_info = candidates
            .iter()
            .filter_map(|c| c.status_info.as_ref())
            .find(|si| self.acceptable("status", &FieldValue::Text(si.status.clone())))
            .or_else(|| candidates.iter().find_map(|c| c.status_info.as_ref()))
            .cloned();

        let last_updated = candidates
            .iter()
            .map(|c| c.last_updated)
            .max()
            .unwrap_or_else(chrono::Utc::now);

        VehicleRecord {
            id,
            fields,
            photo_urls,
            document_urls,
            status_info,
            last_updated,
        }
    }

    /// Merge URL slot maps per key: first non-empty, non-sentinel value
    /// wins. Not whole-object replacement.
    fn merge_url_map<'a, I>(&self, maps: I) -> BTreeMap<String, String>
    where
        I: Iterator<Item = &'a BTreeMap<String, String>> + Clone,
    {
        let slots: BTreeSet<&String> = maps.clone().flat_map(|m| m.keys()).collect();
        let mut merged = BTreeMap::new();
        for slot in slots {
            if let Some(url) = maps
                .clone()
                .filter_map(|m| m.get(slot))
                .find(|url| self.acceptable_url(url))
            {
                merged.insert(slot.clone(), url.clone());
            }
        }
        merged
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::from_policy(&CachePolicy::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use proptest::prelude::*;

    fn record(id: &str, fields: &[(&str, FieldValue)]) -> VehicleRecord {
        let mut r = VehicleRecord::stub(VehicleId::new(id));
        for (name, value) in fields {
            r.fields.insert(name.to_string(), value.clone());
        }
        r
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn test_merge_priority_and_gap_filling() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[
            record("v1", &[("brand", text("Honda"))]),
            record("v1", &[("brand", text("Unknown")), ("model", text("Activa"))]),
        ]);

        assert_eq!(merged.field("brand"), Some(&text("Honda")));
        assert_eq!(merged.field("model"), Some(&text("Activa")));
    }

    #[test]
    fn test_sentinel_never_overrides_populated() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[
            record("v1", &[("condition", text("Not Available"))]),
            record("v1", &[("condition", text("Good"))]),
        ]);

        assert_eq!(merged.field("condition"), Some(&text("Good")));
    }

    #[test]
    fn test_zero_price_never_overwrites_known_value() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[
            record("v1", &[("price", FieldValue::Number(50000.0))]),
            record("v1", &[("price", FieldValue::Number(0.0))]),
        ]);
        assert_eq!(merged.field("price"), Some(&FieldValue::Number(50000.0)));

        // Same result when the zero arrives with higher priority.
        let merged = policy.merge(&[
            record("v1", &[("price", FieldValue::Number(0.0))]),
            record("v1", &[("price", FieldValue::Number(50000.0))]),
        ]);
        assert_eq!(merged.field("price"), Some(&FieldValue::Number(50000.0)));
    }

    #[test]
    fn test_zero_acceptable_where_semantically_valid() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[record("v1", &[("owner_count", FieldValue::Number(0.0))])]);
        assert_eq!(
            merged.field("owner_count"),
            Some(&FieldValue::Number(0.0))
        );
    }

    #[test]
    fn test_field_defaults_when_no_candidate_acceptable() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[
            record("v1", &[("year", FieldValue::Number(0.0)), ("price", FieldValue::Null)]),
        ]);

        let current_year = f64::from(chrono::Utc::now().year());
        assert_eq!(merged.field("year"), Some(&FieldValue::Number(current_year)));
        assert_eq!(merged.field("price"), Some(&FieldValue::Number(0.0)));
    }

    #[test]
    fn test_field_without_default_is_dropped() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[record("v1", &[("color", text("Unknown"))])]);
        assert_eq!(merged.field("color"), None);
    }

    #[test]
    fn test_alias_resolution_across_candidates() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[
            record("v1", &[("reg_no", text("DL5SAB1234"))]),
            record("v1", &[("registration_number", text("Unknown"))]),
        ]);

        assert_eq!(
            merged.field("registration_number"),
            Some(&text("DL5SAB1234"))
        );
        assert_eq!(merged.field("reg_no"), None);
    }

    #[test]
    fn test_alias_only_fills_gap_within_one_candidate() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[record(
            "v1",
            &[
                ("kms_driven", FieldValue::Number(12000.0)),
                ("km_driven", FieldValue::Number(99999.0)),
            ],
        )]);

        assert_eq!(
            merged.field("kms_driven"),
            Some(&FieldValue::Number(12000.0))
        );
    }

    #[test]
    fn test_alias_stands_in_when_canonical_is_unset() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[record(
            "v1",
            &[
                ("kms_driven", FieldValue::Number(0.0)),
                ("km_driven", FieldValue::Number(8000.0)),
            ],
        )]);

        assert_eq!(
            merged.field("kms_driven"),
            Some(&FieldValue::Number(8000.0))
        );
    }

    #[test]
    fn test_canonical_name_wins_from_either_side_of_sort_order() {
        let policy = MergePolicy::default();
        // "make" sorts after its canonical name "brand"...
        let merged = policy.merge(&[record(
            "v1",
            &[("brand", text("Honda")), ("make", text("Hero"))],
        )]);
        assert_eq!(merged.field("brand"), Some(&text("Honda")));

        // ...but still only wins the slot when it is itself populated.
        let merged = policy.merge(&[record(
            "v1",
            &[("brand", text("Unknown")), ("make", text("Hero"))],
        )]);
        assert_eq!(merged.field("brand"), Some(&text("Hero")));
    }

    #[test]
    fn test_url_maps_merge_per_slot() {
        let policy = MergePolicy::default();
        let mut high = record("v1", &[]);
        high.photo_urls
            .insert("front".to_string(), String::new());
        high.photo_urls
            .insert("back".to_string(), "https://cdn/back.jpg".to_string());
        let mut low = record("v1", &[]);
        low.photo_urls
            .insert("front".to_string(), "https://cdn/front.jpg".to_string());

        let merged = policy.merge(&[high, low]);
        assert_eq!(
            merged.photo_urls.get("front").map(String::as_str),
            Some("https://cdn/front.jpg")
        );
        assert_eq!(
            merged.photo_urls.get("back").map(String::as_str),
            Some("https://cdn/back.jpg")
        );
    }

    #[test]
    fn test_status_info_prefers_populated_status() {
        let policy = MergePolicy::default();
        let mut high = record("v1", &[]);
        high.status_info = Some(StatusInfo {
            status: "Unknown".to_string(),
            status_display: None,
            title: None,
            message: None,
        });
        let mut low = record("v1", &[]);
        low.status_info = Some(StatusInfo {
            status: "inspection_scheduled".to_string(),
            status_display: Some("Inspection scheduled".to_string()),
            title: None,
            message: None,
        });

        let merged = policy.merge(&[high, low]);
        assert_eq!(
            merged.status_info.map(|s| s.status),
            Some("inspection_scheduled".to_string())
        );
    }

    #[test]
    fn test_id_taken_from_first_named_candidate() {
        let policy = MergePolicy::default();
        let merged = policy.merge(&[
            record("", &[("brand", text("Hero"))]),
            record("v7", &[]),
        ]);
        assert_eq!(merged.id, VehicleId::new("v7"));
    }

    #[test]
    fn test_last_updated_is_newest() {
        let policy = MergePolicy::default();
        let mut old = record("v1", &[]);
        old.last_updated = chrono::Utc::now() - chrono::Duration::hours(2);
        let fresh = record("v1", &[]);
        let expected = fresh.last_updated;

        let merged = policy.merge(&[old, fresh]);
        assert_eq!(merged.last_updated, expected);
    }

    // Any value the merge picks for a field must be acceptable whenever at
    // least one candidate held an acceptable value, and it must be the
    // highest-priority such value.
    proptest! {
        #[test]
        fn prop_merge_never_picks_sentinel_over_populated(
            brands in proptest::collection::vec(
                proptest::option::of(prop_oneof![
                    Just("Honda".to_string()),
                    Just("Hero".to_string()),
                    Just("Bajaj".to_string()),
                    Just("Unknown".to_string()),
                    Just("Not Available".to_string()),
                    Just(String::new()),
                ]),
                1..5,
            )
        ) {
            let policy = MergePolicy::default();
            let candidates: Vec<VehicleRecord> = brands
                .iter()
                .map(|brand| {
                    let mut r = VehicleRecord::stub(VehicleId::new("v1"));
                    if let Some(brand) = brand {
                        r.fields.insert("brand".to_string(), FieldValue::Text(brand.clone()));
                    }
                    r
                })
                .collect();

            let merged = policy.merge(&candidates);
            let first_acceptable = brands.iter().flatten().find(|b| {
                policy.acceptable("brand", &FieldValue::Text((*b).clone()))
            });

            match first_acceptable {
                Some(expected) => {
                    prop_assert_eq!(
                        merged.field("brand"),
                        Some(&FieldValue::Text(expected.clone()))
                    );
                }
                None => prop_assert_eq!(merged.field("brand"), None),
            }
        }
    }
}
