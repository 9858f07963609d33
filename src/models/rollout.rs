use serde::{Deserialize, Serialize};

/// Either a fixed variation index or a percentage rollout.
///
/// Used both as a flag's `fallthrough` and, flattened, as the
/// variation-or-rollout half of a [`Rule`](crate::models::Rule).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VariationOrRollout {
    pub variation: Option<usize>,
    #[serde(default)]
    pub rollout: Option<Rollout>,
}

/// Probabilistic assignment of users to variations via bucketing.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Rollout {
    #[serde(default)]
    pub variations: Vec<WeightedVariation>,
    #[serde(rename = "bucketBy", default)]
    pub bucket_by: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct WeightedVariation {
    pub variation: usize,
    /// 0..=100_000. Conventionally, weights across one rollout sum to
    /// 100_000, but this is not enforced; see the bucketing "last
    /// variation wins" overflow rule.
    pub weight: i64,
}
