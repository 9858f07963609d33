//! Accumulates per-flag evaluation counters between flush intervals
//! so repeated evaluations of the same flag/variation collapse into
//! one counter instead of one event each.

use super::model::{FeatureEvent, SummaryCounter, SummaryFlag, SummaryOutput};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CounterKey {
    flag_key: String,
    variation: Option<usize>,
    version: Option<u64>,
}

struct Counter {
    value: Value,
    default: Value,
    count: u64,
}

/// Not `Send`/`Sync` by itself; the event processor owns a single
/// instance on its background task and never shares it across threads.
pub struct EventSummarizer {
    start_date: Option<i64>,
    end_date: i64,
    counters: HashMap<CounterKey, Counter>,
}

impl EventSummarizer {
    pub fn new() -> Self {
        Self {
            start_date: None,
            end_date: 0,
            counters: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn add(&mut self, event: &FeatureEvent) {
        if self.start_date.is_none() || event.creation_date < self.start_date.unwrap() {
            self.start_date = Some(event.creation_date);
        }
        if event.creation_date > self.end_date {
            self.end_date = event.creation_date;
        }
        let key = CounterKey {
            flag_key: event.key.clone(),
            variation: event.variation,
            version: event.version,
        };
        self.counters
            .entry(key)
            .and_modify(|c| c.count += 1)
            .or_insert(Counter {
                value: event.value.clone(),
                default: event.default.clone(),
                count: 1,
            });
    }

    /// Drain the accumulated counters into a wire `summary` event,
    /// resetting internal state for the next interval. Returns `None`
    /// if nothing was recorded.
    pub fn finish(&mut self) -> Option<SummaryOutput> {
        if self.counters.is_empty() {
            return None;
        }
        let start_date = self.start_date.take().unwrap_or(self.end_date);
        let end_date = self.end_date;
        self.end_date = 0;

        let mut features: HashMap<String, SummaryFlag> = HashMap::new();
        for (key, counter) in self.counters.drain() {
            let flag = features.entry(key.flag_key).or_insert_with(|| SummaryFlag {
                default: counter.default.clone(),
                counters: Vec::new(),
            });
            flag.counters.push(SummaryCounter {
                variation: key.variation,
                version: key.version,
                unknown: key.version.is_none(),
                count: counter.count,
                value: counter.value,
            });
        }

        Some(SummaryOutput {
            start_date,
            end_date,
            features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reason;
    use crate::user::User;

    fn event(key: &str, variation: Option<usize>, version: Option<u64>, value: Value, ts: i64) -> FeatureEvent {
        FeatureEvent {
            creation_date: ts,
            key: key.to_string(),
            user: User::new("u1"),
            value,
            variation,
            default: Value::Bool(false),
            version,
            prereq_of: None,
            track_events: false,
            debug_events_until_date: None,
            reason: Reason::Off,
        }
    }

    #[test]
    fn collapses_repeated_evaluations_into_one_counter() {
        let mut summarizer = EventSummarizer::new();
        summarizer.add(&event("flag", Some(0), Some(1), Value::Bool(true), 100));
        summarizer.add(&event("flag", Some(0), Some(1), Value::Bool(true), 200));
        summarizer.add(&event("flag", Some(1), Some(1), Value::Bool(false), 150));

        let summary = summarizer.finish().unwrap();
        assert_eq!(summary.start_date, 100);
        assert_eq!(summary.end_date, 200);
        let flag = &summary.features["flag"];
        assert_eq!(flag.counters.len(), 2);
        let hit = flag.counters.iter().find(|c| c.variation == Some(0)).unwrap();
        assert_eq!(hit.count, 2);
    }

    #[test]
    fn empty_summarizer_produces_no_output() {
        let mut summarizer = EventSummarizer::new();
        assert!(summarizer.finish().is_none());
    }

    #[test]
    fn unknown_flag_evaluation_marks_counter_unknown() {
        let mut summarizer = EventSummarizer::new();
        summarizer.add(&event("missing", None, None, Value::Bool(false), 100));
        let summary = summarizer.finish().unwrap();
        assert!(summary.features["missing"].counters[0].unknown);
    }
}
