//! Flag evaluation: the deterministic algorithm that maps a flag and
//! a user to a value, a reason, and (if applicable) a variation index.
//!
//! Runs entirely against a [`Store`] snapshot; it never talks to the
//! network itself. Prerequisite checks walk the dependency chain
//! recursively and, if an [`EventSink`] is attached, emit one
//! synthetic feature event per prerequisite evaluated, matching how a
//! real client wires the evaluator to its event processor.

use crate::events::FeatureEvent;
use crate::models::{Clause, Detail, ErrorKind, FeatureFlag, Operator, Reason, Rule, Segment, SegmentRule};
use crate::store::Store;
use crate::user::User;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Receives prerequisite-evaluation events as the evaluator walks a
/// flag's dependency chain. Implemented by `EventProcessor`.
pub trait EventSink: Send + Sync {
    fn send_feature_event(&self, event: FeatureEvent);
}

/// The result of evaluating one flag: the resolved value plus enough
/// context to build both a `Detail<Value>` and an analytics event.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub value: Value,
    pub variation_index: Option<usize>,
    pub reason: Reason,
    pub track_events: bool,
    pub flag_version: Option<u64>,
    pub debug_events_until_date: Option<i64>,
}

impl Evaluation {
    fn error(kind: ErrorKind) -> Self {
        Self {
            value: Value::Null,
            variation_index: None,
            reason: Reason::Error { error_kind: kind },
            track_events: false,
            flag_version: None,
            debug_events_until_date: None,
        }
    }

    pub fn detail(&self) -> Detail<Value> {
        Detail::new(self.value.clone(), self.variation_index, self.reason.clone())
    }
}

struct Resolved {
    variation_index: usize,
    reason: Reason,
    track_events: bool,
}

/// Evaluates flags against a [`Store`], optionally emitting
/// prerequisite events into an [`EventSink`].
pub struct Evaluator<S> {
    store: S,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl<S: Store> Evaluator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            event_sink: None,
        }
    }

    pub fn with_event_sink(store: S, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            event_sink: Some(event_sink),
        }
    }

    /// Evaluate `key` for `user`, running the preliminary checks the
    /// flag-level algorithm doesn't cover itself (store readiness, a
    /// usable user key, flag existence) before walking the flag.
    pub fn evaluate_flag(&self, key: &str, user: &User) -> Evaluation {
        if !self.store.initialized() {
            return Evaluation::error(ErrorKind::ClientNotReady);
        }
        if user.key.is_empty() {
            return Evaluation::error(ErrorKind::UserNotSpecified);
        }
        let flag = match self.store.flag(key) {
            Some(flag) => flag,
            None => return Evaluation::error(ErrorKind::FlagNotFound),
        };
        let mut visited = HashSet::new();
        self.evaluate_index(&flag, user, &mut visited)
    }

    fn evaluate_index(&self, flag: &FeatureFlag, user: &User, visited: &mut HashSet<String>) -> Evaluation {
        match self.evaluate_or_err(flag, user, visited) {
            Ok(evaluation) => evaluation,
            Err(kind) => Evaluation::error(kind),
        }
    }

    /// Same algorithm as [`Self::evaluate_index`], but keeps errors as
    /// `Err` instead of folding them into an `Evaluation`. Used by
    /// [`Self::check_prerequisites`] so that an error surfacing deep in
    /// the dependency chain (in particular a cycle detected several
    /// levels down) propagates with `?` all the way back out, rather
    /// than being laundered into an ordinary "prerequisite not
    /// satisfied" outcome at the level where it happened to surface.
    fn evaluate_or_err(&self, flag: &FeatureFlag, user: &User, visited: &mut HashSet<String>) -> Result<Evaluation, ErrorKind> {
        let resolved = self.eval_outcome(flag, user, visited)?;
        match flag.variations.get(resolved.variation_index) {
            Some(value) => Ok(Evaluation {
                value: value.clone(),
                variation_index: Some(resolved.variation_index),
                reason: resolved.reason,
                track_events: resolved.track_events,
                flag_version: Some(flag.version),
                debug_events_until_date: flag.debug_events_until_date,
            }),
            None => Err(ErrorKind::MalformedFlag),
        }
    }

    fn eval_outcome(&self, flag: &FeatureFlag, user: &User, visited: &mut HashSet<String>) -> Result<Resolved, ErrorKind> {
        if !flag.on {
            let variation_index = flag.off_variation.ok_or(ErrorKind::MalformedFlag)?;
            return Ok(Resolved {
                variation_index,
                reason: Reason::Off,
                track_events: flag.track_events,
            });
        }

        if let Some(failed_key) = self.check_prerequisites(flag, user, visited)? {
            let variation_index = flag.off_variation.ok_or(ErrorKind::MalformedFlag)?;
            return Ok(Resolved {
                variation_index,
                reason: Reason::PrerequisiteFailed {
                    prerequisite_key: failed_key,
                },
                track_events: flag.track_events,
            });
        }

        if let Some(variation_index) = self.target_match(flag, user) {
            return Ok(Resolved {
                variation_index,
                reason: Reason::TargetMatch,
                track_events: flag.track_events,
            });
        }

        for (rule_index, rule) in flag.rules.iter().enumerate() {
            if self.rule_matches(rule, user) {
                let variation_index = resolve_variation_or_rollout(&rule.variation_or_rollout, user, &flag.key, &flag.salt)?;
                return Ok(Resolved {
                    variation_index,
                    reason: Reason::RuleMatch {
                        rule_index,
                        rule_id: rule.id.clone(),
                    },
                    track_events: flag.track_events || rule.track_events,
                });
            }
        }

        let variation_index = resolve_variation_or_rollout(&flag.fallthrough, user, &flag.key, &flag.salt)?;
        Ok(Resolved {
            variation_index,
            reason: Reason::Fallthrough,
            track_events: flag.track_events || flag.track_events_fallthrough,
        })
    }

    /// Evaluate every prerequisite (not short-circuiting on the first
    /// failure) so an attached event sink always sees one event per
    /// prerequisite, the way a production client's analytics stream
    /// does. Returns the first failing key, if any.
    ///
    /// A prerequisite cycle (A depends on B depends on A) is reported
    /// as `MalformedFlag` rather than infinitely recursing.
    fn check_prerequisites(&self, flag: &FeatureFlag, user: &User, visited: &mut HashSet<String>) -> Result<Option<String>, ErrorKind> {
        let mut first_failure: Option<String> = None;
        for prereq in &flag.prerequisites {
            if !visited.insert(prereq.key.clone()) {
                return Err(ErrorKind::MalformedFlag);
            }
            let prereq_flag = self.store.flag(&prereq.key);
            let evaluation = match &prereq_flag {
                Some(f) => Some(self.evaluate_or_err(f, user, visited)?),
                None => None,
            };
            visited.remove(&prereq.key);

            let satisfied = match (&prereq_flag, &evaluation) {
                (Some(f), Some(eval)) => f.on && eval.variation_index == Some(prereq.variation),
                _ => false,
            };

            if let (Some(f), Some(eval)) = (&prereq_flag, &evaluation) {
                if let Some(sink) = &self.event_sink {
                    sink.send_feature_event(FeatureEvent {
                        creation_date: chrono::Utc::now().timestamp_millis(),
                        key: prereq.key.clone(),
                        user: user.clone(),
                        value: eval.value.clone(),
                        variation: eval.variation_index,
                        default: Value::Null,
                        version: Some(f.version),
                        prereq_of: Some(flag.key.clone()),
                        track_events: f.track_events,
                        debug_events_until_date: f.debug_events_until_date,
                        reason: eval.reason.clone(),
                    });
                }
            }

            if !satisfied && first_failure.is_none() {
                first_failure = Some(prereq.key.clone());
            }
        }
        Ok(first_failure)
    }

    fn target_match(&self, flag: &FeatureFlag, user: &User) -> Option<usize> {
        flag.targets
            .iter()
            .find(|target| target.values.contains(&user.key))
            .map(|target| target.variation)
    }

    fn rule_matches(&self, rule: &Rule, user: &User) -> bool {
        rule.clauses.iter().all(|clause| self.clause_matches(clause, user))
    }

    /// Matches one rule clause. `segmentMatch` references get a fresh
    /// cycle-detection set per reference: two sibling clauses (or two
    /// rules) that each reference the same segment are independent
    /// checks, not a cycle.
    fn clause_matches(&self, clause: &Clause, user: &User) -> bool {
        let matched = if clause.op == Operator::SegmentMatch {
            clause.values.iter().any(|value| {
                value
                    .as_str()
                    .map(|key| {
                        let mut seg_visited = HashSet::new();
                        self.segment_contains(key, user, &mut seg_visited)
                    })
                    .unwrap_or(false)
            })
        } else {
            let user_value = user.attribute(&clause.attribute);
            clause_values_match(clause.op, &user_value, &clause.values)
        };
        if clause.negate {
            !matched
        } else {
            matched
        }
    }

    fn segment_contains(&self, key: &str, user: &User, visited: &mut HashSet<String>) -> bool {
        if !visited.insert(key.to_string()) {
            return false;
        }
        let result = match self.store.segment(key) {
            Some(segment) => self.segment_matches(&segment, user, visited),
            None => false,
        };
        visited.remove(key);
        result
    }

    fn segment_matches(&self, segment: &Segment, user: &User, visited: &mut HashSet<String>) -> bool {
        if segment.included.contains(&user.key) {
            return true;
        }
        if segment.excluded.contains(&user.key) {
            return false;
        }
        segment
            .rules
            .iter()
            .any(|rule| self.segment_rule_matches(rule, segment, user, visited))
    }

    fn segment_rule_matches(&self, rule: &SegmentRule, segment: &Segment, user: &User, visited: &mut HashSet<String>) -> bool {
        if !rule.clauses.iter().all(|clause| self.segment_clause_matches(clause, user, visited)) {
            return false;
        }
        match rule.weight {
            Some(weight) => {
                let bucket_by = rule.bucket_by.as_deref().unwrap_or("key");
                let bucket = crate::bucketing::bucket_user(user, &segment.key, bucket_by, &segment.salt);
                bucket < (weight as f64 / 100_000.0)
            }
            None => true,
        }
    }

    /// Same as [`Self::clause_matches`], but used from within a
    /// segment's own rules, threading the caller's `visited` set so a
    /// segment that (directly or transitively) references itself is
    /// caught instead of recursing forever.
    fn segment_clause_matches(&self, clause: &Clause, user: &User, visited: &mut HashSet<String>) -> bool {
        let matched = if clause.op == Operator::SegmentMatch {
            clause.values.iter().any(|value| {
                value
                    .as_str()
                    .map(|key| self.segment_contains(key, user, visited))
                    .unwrap_or(false)
            })
        } else {
            let user_value = user.attribute(&clause.attribute);
            clause_values_match(clause.op, &user_value, &clause.values)
        };
        if clause.negate {
            !matched
        } else {
            matched
        }
    }
}

/// Matches a resolved user attribute against a clause's value list.
/// When the attribute itself is an array (a user can have an array-
/// valued custom attribute), the clause matches if any element of
/// that array satisfies the operator against any of the clause's
/// values; a scalar attribute is tested directly against each clause
/// value.
fn clause_values_match(op: Operator, user_value: &Value, clause_values: &[Value]) -> bool {
    match user_value {
        Value::Array(elements) => elements
            .iter()
            .any(|element| clause_values.iter().any(|value| crate::operators::evaluate(op, element, value))),
        other => clause_values.iter().any(|value| crate::operators::evaluate(op, other, value)),
    }
}

fn resolve_variation_or_rollout(
    vr: &crate::models::VariationOrRollout,
    user: &User,
    flag_key: &str,
    salt: &str,
) -> Result<usize, ErrorKind> {
    if let Some(variation) = vr.variation {
        return Ok(variation);
    }
    let rollout = vr.rollout.as_ref().ok_or(ErrorKind::MalformedFlag)?;
    crate::bucketing::variation_for_rollout(rollout, user, flag_key, salt).ok_or(ErrorKind::MalformedFlag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Prerequisite, Rule, Target, VariationOrRollout};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::collections::HashMap;

    fn flag(key: &str, on: bool, variations: Vec<Value>) -> FeatureFlag {
        FeatureFlag {
            key: key.to_string(),
            version: 1,
            on,
            variations,
            off_variation: Some(0),
            fallthrough: VariationOrRollout {
                variation: Some(0),
                rollout: None,
            },
            targets: Vec::new(),
            rules: Vec::new(),
            prerequisites: Vec::new(),
            salt: "salt".to_string(),
            track_events: false,
            track_events_fallthrough: false,
            client_side: false,
            debug_events_until_date: None,
            deleted: false,
        }
    }

    fn store_with(flags: Vec<FeatureFlag>, segments: Vec<Segment>) -> MemoryStore {
        let store = MemoryStore::new();
        let flags = flags.into_iter().map(|f| (f.key.clone(), f)).collect::<HashMap<_, _>>();
        let segments = segments.into_iter().map(|s| (s.key.clone(), s)).collect::<HashMap<_, _>>();
        store.init(flags, segments);
        store
    }

    #[test]
    fn off_flag_returns_off_variation_and_reason() {
        let f = flag("f", false, vec![json!("a"), json!("b")]);
        let store = store_with(vec![f], vec![]);
        let evaluator = Evaluator::new(store);
        let user = User::new("u1");
        let evaluation = evaluator.evaluate_flag("f", &user);
        assert_eq!(evaluation.value, json!("a"));
        assert_eq!(evaluation.reason, Reason::Off);
    }

    #[test]
    fn target_match_takes_priority_over_fallthrough() {
        let mut f = flag("f", true, vec![json!("a"), json!("b")]);
        f.targets.push(Target {
            variation: 1,
            values: ["u1".to_string()].into_iter().collect(),
        });
        let store = store_with(vec![f], vec![]);
        let evaluator = Evaluator::new(store);
        let user = User::new("u1");
        let evaluation = evaluator.evaluate_flag("f", &user);
        assert_eq!(evaluation.value, json!("b"));
        assert_eq!(evaluation.reason, Reason::TargetMatch);
    }

    #[test]
    fn rule_match_identifies_rule_by_index_and_id() {
        let mut f = flag("f", true, vec![json!("a"), json!("b")]);
        f.rules.push(Rule {
            id: "rule-1".to_string(),
            clauses: vec![Clause {
                attribute: "plan".to_string(),
                op: Operator::In,
                values: vec![json!("enterprise")],
                negate: false,
            }],
            variation_or_rollout: VariationOrRollout {
                variation: Some(1),
                rollout: None,
            },
            track_events: false,
        });
        let store = store_with(vec![f], vec![]);
        let evaluator = Evaluator::new(store);
        let user = User::builder("u1").custom("plan", "enterprise").build();
        let evaluation = evaluator.evaluate_flag("f", &user);
        assert_eq!(evaluation.value, json!("b"));
        assert_eq!(
            evaluation.reason,
            Reason::RuleMatch {
                rule_index: 0,
                rule_id: "rule-1".to_string()
            }
        );
    }

    #[test]
    fn failing_prerequisite_forces_off_variation() {
        let mut dependent = flag("dependent", true, vec![json!("off"), json!("on")]);
        dependent.prerequisites.push(Prerequisite {
            key: "base".to_string(),
            variation: 1,
        });
        let base = flag("base", true, vec![json!(false), json!(true)]);
        // base's fallthrough resolves to variation 0, not the required 1.
        let store = store_with(vec![dependent, base], vec![]);
        let evaluator = Evaluator::new(store);
        let user = User::new("u1");
        let evaluation = evaluator.evaluate_flag("dependent", &user);
        assert_eq!(evaluation.value, json!("off"));
        assert_eq!(
            evaluation.reason,
            Reason::PrerequisiteFailed {
                prerequisite_key: "base".to_string()
            }
        );
    }

    #[test]
    fn array_valued_attribute_matches_by_any_element() {
        let mut f = flag("f", true, vec![json!("a"), json!("b")]);
        f.rules.push(Rule {
            id: "groups-rule".to_string(),
            clauses: vec![Clause {
                attribute: "groups".to_string(),
                op: Operator::In,
                values: vec![json!("admins")],
                negate: false,
            }],
            variation_or_rollout: VariationOrRollout {
                variation: Some(1),
                rollout: None,
            },
            track_events: false,
        });
        let store = store_with(vec![f], vec![]);
        let evaluator = Evaluator::new(store);
        let user = User::builder("u1")
            .custom("groups", json!(["editors", "admins"]))
            .build();
        let evaluation = evaluator.evaluate_flag("f", &user);
        assert_eq!(evaluation.value, json!("b"));
    }

    #[test]
    fn prerequisite_cycle_is_malformed_not_infinite_loop() {
        let mut a = flag("a", true, vec![json!("a0"), json!("a1")]);
        a.prerequisites.push(Prerequisite {
            key: "b".to_string(),
            variation: 0,
        });
        let mut b = flag("b", true, vec![json!("b0"), json!("b1")]);
        b.prerequisites.push(Prerequisite {
            key: "a".to_string(),
            variation: 0,
        });
        let store = store_with(vec![a, b], vec![]);
        let evaluator = Evaluator::new(store);
        let user = User::new("u1");
        let evaluation = evaluator.evaluate_flag("a", &user);
        assert_eq!(
            evaluation.reason,
            Reason::Error {
                error_kind: ErrorKind::MalformedFlag
            }
        );
        let evaluation = evaluator.evaluate_flag("b", &user);
        assert_eq!(
            evaluation.reason,
            Reason::Error {
                error_kind: ErrorKind::MalformedFlag
            }
        );
    }

    #[test]
    fn segment_match_clause_uses_included_set() {
        let mut f = flag("f", true, vec![json!("a"), json!("b")]);
        f.rules.push(Rule {
            id: "seg-rule".to_string(),
            clauses: vec![Clause {
                attribute: String::new(),
                op: Operator::SegmentMatch,
                values: vec![json!("vips")],
                negate: false,
            }],
            variation_or_rollout: VariationOrRollout {
                variation: Some(1),
                rollout: None,
            },
            track_events: false,
        });
        let segment = Segment {
            key: "vips".to_string(),
            version: 1,
            included: ["u1".to_string()].into_iter().collect(),
            excluded: HashSet::new(),
            rules: Vec::new(),
            salt: "salt".to_string(),
            deleted: false,
        };
        let store = store_with(vec![f], vec![segment]);
        let evaluator = Evaluator::new(store);
        let user = User::new("u1");
        let evaluation = evaluator.evaluate_flag("f", &user);
        assert_eq!(evaluation.value, json!("b"));
    }

    #[test]
    fn unready_store_reports_client_not_ready() {
        let store = MemoryStore::new();
        let evaluator = Evaluator::new(store);
        let user = User::new("u1");
        let evaluation = evaluator.evaluate_flag("f", &user);
        assert_eq!(
            evaluation.reason,
            Reason::Error {
                error_kind: ErrorKind::ClientNotReady
            }
        );
    }

    #[test]
    fn empty_user_key_is_rejected() {
        let store = store_with(vec![flag("f", true, vec![json!("a")])], vec![]);
        let evaluator = Evaluator::new(store);
        let user = User::new("");
        let evaluation = evaluator.evaluate_flag("f", &user);
        assert_eq!(
            evaluation.reason,
            Reason::Error {
                error_kind: ErrorKind::UserNotSpecified
            }
        );
    }
}
