use super::clause::Clause;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A reusable named user-set, referenced by flags via the
/// `segmentMatch` clause operator.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub included: HashSet<String>,
    #[serde(default)]
    pub excluded: HashSet<String>,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub deleted: bool,
}

impl Segment {
    pub fn tombstone(key: impl Into<String>, version: u64) -> Self {
        Self {
            key: key.into(),
            version,
            deleted: true,
            ..Default::default()
        }
    }
}

/// One rule within a [`Segment`]. Matches when all `clauses` match
/// and, if `weight` is set, the user falls inside the rollout
/// percentage determined by `bucket_by`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SegmentRule {
    #[serde(default)]
    pub clauses: Vec<Clause>,
    pub weight: Option<i64>,
    #[serde(rename = "bucketBy", default)]
    pub bucket_by: Option<String>,
}
