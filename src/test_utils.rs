//! Builders and fakes shared across `#[cfg(test)]` modules: flags,
//! segments, rules, clauses, users, and a null [`Source`] for tests
//! that never need real network traffic.

use crate::{
    message::Message,
    models::{Clause, FeatureFlag, Operator, Prerequisite, Rule, Segment, SegmentRule, Target, VariationOrRollout, WeightedVariation},
    source::Source,
};
use serde_json::Value;
use std::{collections::HashSet, convert::Infallible};

pub struct NullSource;

impl Source for NullSource {
    type Error = Infallible;
    type Stream = futures::stream::Pending<Result<Message, Self::Error>>;

    fn stream(&self) -> Self::Stream {
        futures::stream::pending()
    }
}

/// Fluent construction of a [`FeatureFlag`] for tests, defaulting to a
/// simple on/off boolean flag (`variations = [false, true]`,
/// fallthrough variation 0) so most tests only need to override the
/// one or two fields they care about.
pub struct FlagBuilder(FeatureFlag);

impl Default for FlagBuilder {
    fn default() -> Self {
        Self(FeatureFlag {
            key: "my_test_flag".into(),
            version: 1,
            on: true,
            variations: vec![Value::Bool(false), Value::Bool(true)],
            off_variation: Some(0),
            fallthrough: VariationOrRollout {
                variation: Some(0),
                rollout: None,
            },
            salt: "test-salt".into(),
            ..Default::default()
        })
    }
}

#[allow(dead_code)]
impl FlagBuilder {
    pub fn off(mut self) -> Self {
        self.0.on = false;
        self
    }

    pub fn on(mut self) -> Self {
        self.0.on = true;
        self
    }

    pub fn with_key<K: Into<String>>(mut self, key: K) -> Self {
        self.0.key = key.into();
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.0.version = version;
        self
    }

    pub fn with_off_variation(mut self, idx: usize) -> Self {
        self.0.off_variation = Some(idx);
        self
    }

    pub fn with_variations<I, V>(mut self, iter: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.0.variations = iter.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fallthrough_variation(mut self, idx: usize) -> Self {
        self.0.fallthrough = VariationOrRollout {
            variation: Some(idx),
            rollout: None,
        };
        self
    }

    pub fn with_fallthrough_rollout<I: IntoIterator<Item = (usize, i64)>>(mut self, variations: I) -> Self {
        let variations = variations
            .into_iter()
            .map(|(variation, weight)| WeightedVariation { variation, weight })
            .collect();
        self.0.fallthrough = VariationOrRollout {
            variation: None,
            rollout: Some(crate::models::Rollout {
                variations,
                bucket_by: None,
            }),
        };
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.0.rules.push(rule);
        self
    }

    pub fn with_prerequisite<K: Into<String>>(mut self, key: K, variation: usize) -> Self {
        self.0.prerequisites.push(Prerequisite {
            key: key.into(),
            variation,
        });
        self
    }

    pub fn clear_targets(mut self) -> Self {
        self.0.targets.clear();
        self
    }

    pub fn add_target<V: Into<String>>(mut self, variation: usize, value: V) -> Self {
        if let Some(target) = self.0.targets.iter_mut().find(|t| t.variation == variation) {
            target.values.insert(value.into());
        } else {
            self.0.targets.push(Target {
                variation,
                values: [value.into()].into_iter().collect(),
            });
        }
        self
    }

    pub fn with_salt<S: Into<String>>(mut self, salt: S) -> Self {
        self.0.salt = salt.into();
        self
    }

    pub fn track_events(mut self) -> Self {
        self.0.track_events = true;
        self
    }

    pub fn into_inner(self) -> FeatureFlag {
        self.0
    }
}

/// Fluent construction of a [`Rule`], defaulting to an empty clause
/// list (matches nothing) routing to variation 0.
pub struct RuleBuilder(Rule);

impl Default for RuleBuilder {
    fn default() -> Self {
        Self(Rule {
            id: "rule-0".into(),
            clauses: Vec::new(),
            variation_or_rollout: VariationOrRollout {
                variation: Some(0),
                rollout: None,
            },
            track_events: false,
        })
    }
}

#[allow(dead_code)]
impl RuleBuilder {
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.0.id = id.into();
        self
    }

    pub fn with_clause(mut self, clause: Clause) -> Self {
        self.0.clauses.push(clause);
        self
    }

    pub fn with_variation(mut self, idx: usize) -> Self {
        self.0.variation_or_rollout = VariationOrRollout {
            variation: Some(idx),
            rollout: None,
        };
        self
    }

    pub fn track_events(mut self) -> Self {
        self.0.track_events = true;
        self
    }

    pub fn into_inner(self) -> Rule {
        self.0
    }
}

/// Shorthand for the common case: one clause testing `attribute` with
/// `op` against `values`.
pub fn clause<V: Into<Value>, I: IntoIterator<Item = V>>(attribute: &str, op: Operator, values: I) -> Clause {
    Clause {
        attribute: attribute.to_string(),
        op,
        values: values.into_iter().map(Into::into).collect(),
        negate: false,
    }
}

pub fn segment_match_clause<S: Into<String>>(segment_key: S) -> Clause {
    Clause {
        attribute: String::new(),
        op: Operator::SegmentMatch,
        values: vec![Value::String(segment_key.into())],
        negate: false,
    }
}

/// Fluent construction of a [`Segment`], defaulting to an empty,
/// always-false segment.
pub struct SegmentBuilder(Segment);

impl Default for SegmentBuilder {
    fn default() -> Self {
        Self(Segment {
            key: "my_test_segment".into(),
            version: 1,
            included: HashSet::new(),
            excluded: HashSet::new(),
            rules: Vec::new(),
            salt: "test-salt".into(),
            deleted: false,
        })
    }
}

#[allow(dead_code)]
impl SegmentBuilder {
    pub fn with_key<K: Into<String>>(mut self, key: K) -> Self {
        self.0.key = key.into();
        self
    }

    pub fn include<K: Into<String>>(mut self, key: K) -> Self {
        self.0.included.insert(key.into());
        self
    }

    pub fn exclude<K: Into<String>>(mut self, key: K) -> Self {
        self.0.excluded.insert(key.into());
        self
    }

    pub fn with_rule(mut self, rule: SegmentRule) -> Self {
        self.0.rules.push(rule);
        self
    }

    pub fn into_inner(self) -> Segment {
        self.0
    }
}
