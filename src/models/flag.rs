use super::rollout::VariationOrRollout;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use super::clause::Clause;

/// A named configuration whose effective value depends on the user.
///
/// Deserializes leniently: a minimal `{"key": "...", "version": 1}`
/// payload is valid and yields a flag that is off with no variations.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct FeatureFlag {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub variations: Vec<Value>,
    #[serde(rename = "offVariation", default)]
    pub off_variation: Option<usize>,
    #[serde(default)]
    pub fallthrough: VariationOrRollout,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub salt: String,
    #[serde(rename = "trackEvents", default)]
    pub track_events: bool,
    #[serde(rename = "trackEventsFallthrough", default)]
    pub track_events_fallthrough: bool,
    #[serde(rename = "clientSide", default)]
    pub client_side: bool,
    #[serde(rename = "debugEventsUntilDate", default)]
    pub debug_events_until_date: Option<i64>,
    /// Tombstone marker. A deleted flag occupies the same (kind, key)
    /// slot and version sequence as a live one; `Store::flag` hides it.
    #[serde(default)]
    pub deleted: bool,
}

impl FeatureFlag {
    /// Build the tombstone flag item used to represent a `delete` update.
    pub fn tombstone(key: impl Into<String>, version: u64) -> Self {
        Self {
            key: key.into(),
            version,
            deleted: true,
            ..Default::default()
        }
    }
}

/// An individually targeted set of user keys routed to one variation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Target {
    pub variation: usize,
    #[serde(default)]
    pub values: HashSet<String>,
}

/// Another flag that must evaluate to `variation` for this flag to
/// be considered active.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Prerequisite {
    pub key: String,
    pub variation: usize,
}

/// An ordered targeting rule: if all `clauses` match the user, the
/// rule's variation-or-rollout determines the result.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
    #[serde(rename = "trackEvents", default)]
    pub track_events: bool,
}
