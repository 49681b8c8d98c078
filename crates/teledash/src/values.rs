// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed value derivation from raw topic payloads.
//!
//! Sensor nodes publish free-form text: plain numerics (with `.` or `,`
//! as decimal separator, depending on firmware locale), flags as `0`/`1`,
//! and sometimes a combined JSON document carrying several readings at
//! once. Everything here is lenient: malformed input yields `None`,
//! never a zero and never an error.

use crate::store::{StoreSnapshot, TopicRecord};

/// Parse a numeric payload, accepting both `.` and `,` decimal separators.
///
/// Surrounding whitespace is tolerated. Returns `None` for anything that
/// is not a single well-formed number.
pub fn parse_f64(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Some(value);
    }
    if trimmed.contains(',') {
        return trimmed.replace(',', ".").parse::<f64>().ok();
    }
    None
}

/// Parse an integer payload through float truncation (`"12.7"` -> `12`),
/// with the same separator tolerance as [`parse_f64`].
pub fn parse_i64(raw: &str) -> Option<i64> {
    let value = parse_f64(raw)?;
    if !value.is_finite() {
        return None;
    }
    if value < i64::MIN as f64 || value > i64::MAX as f64 {
        return None;
    }
    Some(value.trunc() as i64)
}

/// Parse a flag payload (`"1"` / `"0"`, also numeric text like `"1.0"`).
pub fn parse_flag(raw: &str) -> Option<bool> {
    parse_i64(raw).map(|v| v != 0)
}

/// Parse a payload as a JSON object. Non-object documents (arrays,
/// scalars) and malformed JSON yield `None`.
pub fn json_object(payload: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    if value.is_object() {
        Some(value)
    } else {
        None
    }
}

/// Extract a numeric field from a JSON bundle payload.
///
/// Accepts JSON numbers and numeric strings (separator-tolerant);
/// missing fields, nulls, and nested structures yield `None`.
pub fn json_f64(payload: &str, field: &str) -> Option<f64> {
    let bundle = json_object(payload)?;
    match bundle.get(field)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_f64(s),
        _ => None,
    }
}

/// Extract a boolean-ish field from a JSON bundle payload.
///
/// Accepts JSON bools, numbers (nonzero = true), and numeric strings.
pub fn json_flag(payload: &str, field: &str) -> Option<bool> {
    let bundle = json_object(payload)?;
    match bundle.get(field)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        serde_json::Value::String(s) => parse_flag(s),
        _ => None,
    }
}

/// Resolve an ordered list of candidate topics against a snapshot,
/// returning the first record present.
///
/// Topic aliasing is a presentation-side policy: different firmware
/// revisions publish the same reading under different names, so callers
/// keep an ordered preference list instead of baking one name in.
pub fn resolve_first<'a>(
    snapshot: &'a StoreSnapshot,
    candidates: &[&str],
) -> Option<&'a TopicRecord> {
    candidates.iter().find_map(|topic| snapshot.record(topic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;
    use serde_json::json;

    #[test]
    fn test_parse_f64_accepts_both_separators() {
        assert_eq!(parse_f64("12.5"), Some(12.5));
        assert_eq!(parse_f64("12,5"), Some(12.5));
        assert_eq!(parse_f64("  7 "), Some(7.0));
        assert_eq!(parse_f64("-3,25"), Some(-3.25));
    }

    #[test]
    fn test_parse_f64_rejects_garbage() {
        assert_eq!(parse_f64("abc"), None);
        assert_eq!(parse_f64(""), None);
        assert_eq!(parse_f64("   "), None);
        assert_eq!(parse_f64("12,,5"), None);
        assert_eq!(parse_f64("1,234.5"), None);
    }

    #[test]
    fn test_parse_i64_truncates_toward_zero() {
        assert_eq!(parse_i64("12"), Some(12));
        assert_eq!(parse_i64("12.7"), Some(12));
        assert_eq!(parse_i64("12,7"), Some(12));
        assert_eq!(parse_i64("-3.9"), Some(-3));
        assert_eq!(parse_i64("abc"), None);
        assert_eq!(parse_i64("inf"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("1.0"), Some(true));
        assert_eq!(parse_flag("on"), None);
    }

    #[test]
    fn test_missing_topic_yields_missing_value() {
        let store = StateStore::new();
        let snap = store.snapshot();

        // None in, None out: absence is never coerced to zero.
        assert_eq!(snap.payload("esp32_1/temp").and_then(parse_f64), None);
    }

    #[test]
    fn test_json_f64_extraction() {
        let bundle = json!({"temperature": 21.5, "pot": "512", "name": "node1"}).to_string();

        assert_eq!(json_f64(&bundle, "temperature"), Some(21.5));
        assert_eq!(json_f64(&bundle, "pot"), Some(512.0));
        assert_eq!(json_f64(&bundle, "name"), None);
        assert_eq!(json_f64(&bundle, "absent"), None);
    }

    #[test]
    fn test_json_f64_tolerates_bad_payloads() {
        assert_eq!(json_f64("not json at all", "temperature"), None);
        assert_eq!(json_f64("[1, 2, 3]", "temperature"), None);
        assert_eq!(json_f64("42", "temperature"), None);
    }

    #[test]
    fn test_json_flag_variants() {
        let bundle = json!({"alarm": true, "flame": 1, "ir": 0, "mode": "1"}).to_string();

        assert_eq!(json_flag(&bundle, "alarm"), Some(true));
        assert_eq!(json_flag(&bundle, "flame"), Some(true));
        assert_eq!(json_flag(&bundle, "ir"), Some(false));
        assert_eq!(json_flag(&bundle, "mode"), Some(true));
        assert_eq!(json_flag(&bundle, "absent"), None);
    }

    #[test]
    fn test_resolve_first_respects_candidate_order() {
        let store = StateStore::new();
        store.put("esp32_1/ldr", "300");
        store.put("esp32_1/luminosity", "512");

        let snap = store.snapshot();
        let record = resolve_first(
            &snap,
            &["esp32/sensors/luminosity", "esp32_1/luminosity", "esp32_1/ldr"],
        );
        assert_eq!(record.map(|r| r.payload.as_str()), Some("512"));

        let none = resolve_first(&snap, &["esp32_1/temp"]);
        assert!(none.is_none());
    }
}
