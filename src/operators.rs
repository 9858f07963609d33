//! The sixteen clause match predicates.
//!
//! Every operator is a pure `(Value, Value) -> bool` predicate, except
//! `segmentMatch`, which needs a user and a store and is therefore
//! handled one level up in [`crate::evaluator`]. Undefined coercions
//! (wrong types, unparseable dates/semver/regex) all resolve to
//! `false` rather than raising — per spec, nothing here ever throws.

use crate::models::Operator;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use semver::Version;
use serde_json::Value;

/// Evaluate one clause operator. `segment_match` is handled by the
/// caller and should never reach this function; if it does (e.g. a
/// clause built without going through [`crate::evaluator`]), it's
/// treated like an unknown operator and never matches.
pub fn evaluate(op: Operator, user_value: &Value, clause_value: &Value) -> bool {
    match op {
        Operator::In => user_value == clause_value,
        Operator::EndsWith => with_strings(user_value, clause_value, |a, b| a.ends_with(b)),
        Operator::StartsWith => with_strings(user_value, clause_value, |a, b| a.starts_with(b)),
        Operator::Contains => with_strings(user_value, clause_value, |a, b| a.contains(b)),
        Operator::Matches => matches_regex(user_value, clause_value),
        Operator::LessThan => with_numbers(user_value, clause_value, |a, b| a < b),
        Operator::LessThanOrEqual => with_numbers(user_value, clause_value, |a, b| a <= b),
        Operator::GreaterThan => with_numbers(user_value, clause_value, |a, b| a > b),
        Operator::GreaterThanOrEqual => with_numbers(user_value, clause_value, |a, b| a >= b),
        Operator::Before => with_dates(user_value, clause_value, |a, b| a < b),
        Operator::After => with_dates(user_value, clause_value, |a, b| a > b),
        Operator::SemVerEqual => with_semver(user_value, clause_value, |a, b| a == b),
        Operator::SemVerLessThan => with_semver(user_value, clause_value, |a, b| a < b),
        Operator::SemVerGreaterThan => with_semver(user_value, clause_value, |a, b| a > b),
        Operator::SegmentMatch | Operator::Unknown => false,
    }
}

fn with_strings(a: &Value, b: &Value, f: impl FnOnce(&str, &str) -> bool) -> bool {
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

fn matches_regex(user_value: &Value, pattern: &Value) -> bool {
    let (s, pattern) = match (user_value.as_str(), pattern.as_str()) {
        (Some(s), Some(p)) => (s, p),
        _ => return false,
    };
    match Regex::new(pattern) {
        Ok(re) => re.is_match(s),
        Err(_) => false,
    }
}

fn with_numbers(a: &Value, b: &Value, f: impl FnOnce(f64, f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// Parse a value as an instant: epoch-millisecond numbers, or RFC 3339
/// strings (a missing offset is treated as UTC).
fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().map(|ms| Utc.timestamp_millis(ms)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| DateTime::<Utc>::from_utc(naive, Utc))
            }),
        _ => None,
    }
}

fn with_dates(a: &Value, b: &Value, f: impl FnOnce(DateTime<Utc>, DateTime<Utc>) -> bool) -> bool {
    match (parse_date(a), parse_date(b)) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// Parse a semantic version, tolerating a missing minor/patch by
/// filling them in with zero (`"2"` -> `2.0.0`, `"2.1"` -> `2.1.0`).
fn parse_semver_lenient(s: &str) -> Option<Version> {
    let s = s.trim();
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }
    let parts: Vec<&str> = s.split('.').collect();
    let padded = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

fn with_semver(a: &Value, b: &Value, f: impl FnOnce(&Version, &Version) -> bool) -> bool {
    let (a, b) = match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    match (parse_semver_lenient(a), parse_semver_lenient(b)) {
        (Some(a), Some(b)) => f(&a, &b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_is_deep_equality() {
        assert!(evaluate(Operator::In, &json!({"a": 1}), &json!({"a": 1})));
        assert!(!evaluate(Operator::In, &json!({"a": 1}), &json!({"a": 2})));
    }

    #[test]
    fn string_ops_require_strings() {
        assert!(evaluate(Operator::StartsWith, &json!("hello"), &json!("he")));
        assert!(!evaluate(Operator::StartsWith, &json!(5), &json!("he")));
    }

    #[test]
    fn matches_invalid_regex_is_false_not_panic() {
        assert!(!evaluate(Operator::Matches, &json!("abc"), &json!("(")));
    }

    #[test]
    fn matches_non_string_value_is_false() {
        assert!(!evaluate(Operator::Matches, &json!(42), &json!("\\d+")));
    }

    #[test]
    fn numeric_comparison_rejects_non_numbers() {
        assert!(evaluate(Operator::LessThan, &json!(1), &json!(2)));
        assert!(!evaluate(Operator::LessThan, &json!("1"), &json!(2)));
    }

    #[test]
    fn date_comparison_handles_epoch_and_rfc3339() {
        assert!(evaluate(Operator::Before, &json!(0), &json!(1000)));
        assert!(evaluate(
            Operator::Before,
            &json!("2020-01-01T00:00:00Z"),
            &json!("2021-01-01T00:00:00Z")
        ));
        assert!(!evaluate(Operator::Before, &json!("not-a-date"), &json!(1000)));
    }

    #[test]
    fn semver_tolerates_missing_components() {
        assert!(evaluate(Operator::SemVerEqual, &json!("2"), &json!("2.0.0")));
        assert!(evaluate(
            Operator::SemVerLessThan,
            &json!("2.1"),
            &json!("2.1.1")
        ));
        assert!(!evaluate(
            Operator::SemVerEqual,
            &json!("not-a-version"),
            &json!("2.0.0")
        ));
    }

    #[test]
    fn unknown_operator_never_matches() {
        assert!(!evaluate(Operator::Unknown, &json!("x"), &json!("x")));
    }
}
