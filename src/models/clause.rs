use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the sixteen clause match predicates.
///
/// `Unknown` absorbs any operator name this SDK doesn't recognize so
/// that flags authored with newer operators still deserialize; such
/// clauses simply never match (forward compatibility).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    In,
    EndsWith,
    StartsWith,
    Contains,
    Matches,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    SemVerEqual,
    SemVerLessThan,
    SemVerGreaterThan,
    SegmentMatch,
    #[serde(other)]
    Unknown,
}

/// A single condition within a [`Rule`](crate::models::Rule) or
/// [`SegmentRule`](crate::models::SegmentRule).
///
/// `attribute == ""` together with `op == SegmentMatch` is the
/// convention for "this clause refers to segments named in `values`"
/// rather than a user attribute.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Clause {
    #[serde(default)]
    pub attribute: String,
    pub op: Operator,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub negate: bool,
}
