//! Canonical serialization for cross-backend comparison.
//!
//! Two records are "the same" when their canonical JSON matches: object keys
//! sorted (the default `serde_json` map is ordered) and every RFC 3339
//! timestamp reformatted to a fixed precision, so that one backend storing
//! nanoseconds and the other microseconds still compare equal.

use crate::error::StoreResult;
use crate::model::RuleRecord;
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical JSON string for any serializable value.
pub fn canonical_json<T: Serialize>(value: &T) -> StoreResult<String> {
    let value = serde_json::to_value(value)?;
    Ok(normalize(value).to_string())
}

/// Canonical JSON for a full rule record.
pub fn canonical_record(record: &RuleRecord) -> StoreResult<String> {
    canonical_json(record)
}

/// Hex SHA-256 digest of the canonical form.
pub fn canonical_digest<T: Serialize>(value: &T) -> StoreResult<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn normalize(value: Value) -> Value {
    match value {
        Value::String(s) => match DateTime::parse_from_rfc3339(&s) {
            Ok(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Err(_) => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v))).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{record_with_state, sample_rule};

    #[test]
    fn test_identical_records_compare_equal() {
        let a = record_with_state(sample_rule("R-001"), true);
        let b = record_with_state(sample_rule("R-001"), true);
        assert_eq!(canonical_record(&a).unwrap(), canonical_record(&b).unwrap());
    }

    #[test]
    fn test_timestamp_precision_is_normalized() {
        let coarse = serde_json::json!({ "at": "2025-01-01T00:00:00Z" });
        let fine = serde_json::json!({ "at": "2025-01-01T00:00:00.000000123+00:00" });
        // Sub-microsecond digits truncate away, matching the coarse form.
        assert_eq!(
            canonical_json(&coarse).unwrap(),
            canonical_json(&fine).unwrap()
        );
    }

    #[test]
    fn test_non_timestamp_strings_untouched() {
        let value = serde_json::json!({ "title": "Ban 2025-13-99 style dates" });
        assert!(canonical_json(&value).unwrap().contains("2025-13-99"));
    }

    #[test]
    fn test_state_difference_changes_canonical_form() {
        let enabled = record_with_state(sample_rule("R-001"), true);
        let disabled = record_with_state(sample_rule("R-001"), false);
        assert_ne!(
            canonical_record(&enabled).unwrap(),
            canonical_record(&disabled).unwrap()
        );
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let record = record_with_state(sample_rule("R-001"), true);
        let d1 = canonical_digest(&record).unwrap();
        let d2 = canonical_digest(&record).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }
}
