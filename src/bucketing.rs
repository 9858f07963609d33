//! Deterministic user -> `[0.0, 1.0)` hashing used by rollouts.

use crate::models::{Rollout, WeightedVariation};
use crate::user::User;
use sha1::{Digest, Sha1};
use std::ops::Div;

/// `(1 << 60) - 1` expressed as 15 hex `F`s, matching the constant
/// every LaunchDarkly-style SDK implementation hard-codes so that
/// bucket values agree across languages.
const BUCKET_DIVIDER: f64 = 0xFFFFFFFFFFFFFFFu64 as f64;

/// Compute the bucket for `user` under `key` (a flag or segment key),
/// resolving `bucket_by` as described in the bucketing algorithm:
/// string attributes are used as-is, integer attributes are
/// stringified in base 10, and anything else (float, bool, array,
/// object, missing) yields bucket `0.0`.
pub fn bucket_user(user: &User, key: &str, bucket_by: &str, salt: &str) -> f64 {
    let attr = if bucket_by == "key" {
        Some(user.key.clone())
    } else {
        bucketable_string(user, bucket_by)
    };
    let attr = match attr {
        Some(s) => s,
        None => return 0.0,
    };

    let mut input = format!("{}.{}.{}", key, salt, attr);
    if let Some(secondary) = &user.secondary {
        input.push('.');
        input.push_str(secondary);
    }

    let hash = Sha1::new().chain(input.as_bytes()).finalize();
    let hex = hex::encode(&hash[..]);
    let truncated = &hex[..15];
    // Safe to unwrap: 15 hex digits always parse into a u64.
    let as_int = u64::from_str_radix(truncated, 16).unwrap();
    (as_int as f64).div(BUCKET_DIVIDER)
}

fn bucketable_string(user: &User, bucket_by: &str) -> Option<String> {
    let value = user.attribute(bucket_by);
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Result of resolving a [`Rollout`] against a user: either a
/// successfully assigned variation index, or a sign that the rollout
/// has no variations to assign (a malformed-flag condition the
/// caller should surface).
pub fn variation_for_rollout(rollout: &Rollout, user: &User, key: &str, salt: &str) -> Option<usize> {
    if rollout.variations.is_empty() {
        return None;
    }
    let bucket_by = rollout.bucket_by.as_deref().unwrap_or("key");
    let bucket = bucket_user(user, key, bucket_by, salt);
    let scaled = bucket * 100_000.0;

    let mut sum = 0i64;
    for WeightedVariation { variation, weight } in &rollout.variations {
        sum += weight;
        if sum as f64 > scaled {
            return Some(*variation);
        }
    }
    // Defensive tail: weights that don't sum to 100_000 (or a bucket at
    // the very top of the range) fall through to the last variation
    // rather than being treated as unmatched.
    rollout.variations.last().map(|wv| wv.variation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeightedVariation;

    #[test]
    fn known_bucket_value() {
        // From the spec's worked example: SHA1("flagkey.salt.userkey")
        // truncated to 15 hex digits, divided by the bucket divider,
        // should land around 0.42157.
        let user = User::new("userkey");
        let bucket = bucket_user(&user, "flagkey", "key", "salt");
        assert!((bucket - 0.42157).abs() < 0.0001, "bucket = {}", bucket);
    }

    #[test]
    fn non_string_non_integer_bucket_by_is_zero() {
        let mut user = User::new("userkey");
        user.custom
            .insert("floaty".into(), serde_json::json!(1.5));
        let bucket = bucket_user(&user, "flagkey", "floaty", "salt");
        assert_eq!(bucket, 0.0);

        user.custom.insert("flaggy".into(), serde_json::json!(true));
        let bucket = bucket_user(&user, "flagkey", "flaggy", "salt");
        assert_eq!(bucket, 0.0);
    }

    #[test]
    fn integer_bucket_by_stringifies() {
        let mut user = User::new("userkey");
        user.custom.insert("shard".into(), serde_json::json!(42));
        let with_int = bucket_user(&user, "flagkey", "shard", "salt");

        let mut user2 = User::new("userkey");
        user2
            .custom
            .insert("shard".into(), serde_json::json!("42"));
        let with_str = bucket_user(&user2, "flagkey", "shard", "salt");

        assert_eq!(with_int, with_str);
    }

    #[test]
    fn rollout_overflow_returns_last_variation() {
        let rollout = Rollout {
            variations: vec![
                WeightedVariation {
                    variation: 0,
                    weight: 1,
                },
                WeightedVariation {
                    variation: 1,
                    weight: 1,
                },
            ],
            bucket_by: None,
        };
        // Weights sum to 2 out of 100_000, so almost every user
        // overflows the running total and should land on the last
        // weighted variation (index 1).
        let user = User::new("some-arbitrary-user-key-that-buckets-high");
        let result = variation_for_rollout(&rollout, &user, "flagkey", "salt");
        assert_eq!(result, Some(1));
    }
}
