use super::redact::RedactedUser;
use crate::models::Reason;
use crate::user::User;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Closed sum type for everything that can flow through the event
/// pipeline before it's summarized and serialized. Kept as an enum
/// rather than the source SDK's inheritance hierarchy so a `match`
/// statement, not runtime type checks, decides how to process one.
#[derive(Clone, Debug)]
pub enum Event {
    Feature(FeatureEvent),
    Identify(IdentifyEvent),
    Custom(CustomEvent),
}

impl Event {
    pub fn user(&self) -> &User {
        match self {
            Event::Feature(e) => &e.user,
            Event::Identify(e) => &e.user,
            Event::Custom(e) => &e.user,
        }
    }

    pub fn creation_date(&self) -> i64 {
        match self {
            Event::Feature(e) => e.creation_date,
            Event::Identify(e) => e.creation_date,
            Event::Custom(e) => e.creation_date,
        }
    }
}

/// One flag evaluation. Always contributes to the summary counters;
/// only surfaces as a full `feature` (or `debug`) output event when
/// tracking is on for the originating flag/rule, or the flag's debug
/// window is open.
#[derive(Clone, Debug)]
pub struct FeatureEvent {
    pub creation_date: i64,
    pub key: String,
    pub user: User,
    pub value: Value,
    pub variation: Option<usize>,
    pub default: Value,
    /// `None` when the flag wasn't found (counts as "unknown" in the
    /// summary, per spec).
    pub version: Option<u64>,
    pub prereq_of: Option<String>,
    pub track_events: bool,
    pub debug_events_until_date: Option<i64>,
    #[allow(dead_code)]
    pub reason: Reason,
}

#[derive(Clone, Debug)]
pub struct IdentifyEvent {
    pub creation_date: i64,
    pub user: User,
}

#[derive(Clone, Debug)]
pub struct CustomEvent {
    pub creation_date: i64,
    pub key: String,
    pub user: User,
    pub data: Option<Value>,
    pub metric_value: Option<f64>,
}

/// Wire shape posted to `/bulk`. One `OutputEvent` per queued event,
/// plus synthetic `index`/`debug`/`summary` entries the processor
/// adds on the way out.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind")]
pub enum OutputEvent {
    #[serde(rename = "feature")]
    Feature(FeatureOutput),
    #[serde(rename = "identify")]
    Identify(UserOutput),
    #[serde(rename = "custom")]
    Custom(CustomOutput),
    #[serde(rename = "index")]
    Index(UserOutput),
    #[serde(rename = "debug")]
    Debug(FeatureOutput),
    #[serde(rename = "summary")]
    Summary(SummaryOutput),
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Clone, Debug, Serialize)]
pub struct FeatureOutput {
    #[serde(rename = "creationDate")]
    pub creation_date: i64,
    pub key: String,
    #[serde(rename = "userKey", skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<RedactedUser>,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    pub default: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(rename = "prereqOf", skip_serializing_if = "Option::is_none")]
    pub prereq_of: Option<String>,
    #[serde(rename = "trackEvents", skip_serializing_if = "is_false")]
    pub track_events: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserOutput {
    #[serde(rename = "creationDate")]
    pub creation_date: i64,
    pub user: RedactedUser,
}

#[derive(Clone, Debug, Serialize)]
pub struct CustomOutput {
    #[serde(rename = "creationDate")]
    pub creation_date: i64,
    pub key: String,
    #[serde(rename = "userKey", skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<RedactedUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "metricValue", skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SummaryOutput {
    #[serde(rename = "startDate")]
    pub start_date: i64,
    #[serde(rename = "endDate")]
    pub end_date: i64,
    pub features: HashMap<String, SummaryFlag>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SummaryFlag {
    pub default: Value,
    pub counters: Vec<SummaryCounter>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SummaryCounter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "is_false")]
    pub unknown: bool,
    pub count: u64,
    pub value: Value,
}
