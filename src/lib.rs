//! Server-side feature-flag evaluation SDK.
//!
//! [`Client`] is the glue on top of the smaller building blocks: a
//! [`Store`] kept up to date by a [`Source`]/[`Consumer`] pair, an
//! [`Evaluator`] that reads from it, and an [`EventProcessor`] that
//! turns evaluations into analytics.

use self::{
    consumer::{Consumer, ReadError},
    evaluator::{EventSink, Evaluator},
    events::{DiagnosticsConfig, DiagnosticsHandle, Event, EventProcessor, EventProcessorConfig, FeatureEvent},
    models::{Detail, ErrorKind, FeatureFlag, Reason, Segment},
    requestor::{HttpRequestor, Requestor},
    source::{PollingSource, Source, SseSource},
    store::{MemoryStore, Store},
    user::User,
};
use futures::{Stream, StreamExt};
use hmac::{Hmac, Mac, NewMac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::{collections::HashMap, error::Error as StdError, fmt, pin::Pin, sync::Arc};
use tracing::warn;

pub mod bucketing;
pub mod config;
pub mod consumer;
pub mod evaluator;
pub mod events;
pub mod message;
pub mod models;
pub mod operators;
pub mod requestor;
pub mod source;
pub mod store;
#[cfg(test)]
mod test_utils;
pub mod user;

pub use config::Config;

#[derive(Debug, thiserror::Error)]
pub enum StartError<CE>
where
    CE: fmt::Debug + Clone + StdError + 'static,
{
    #[error("Already started, can't start multiple times")]
    AlreadyStarted,

    #[error("Failed to start reading from source: {0}")]
    Start(#[from] ReadError<CE>),
}

/// Combines the streaming and polling transports behind one
/// [`Source`], so [`Client`] can pick between them (or go fully
/// offline) at construction time without changing its own type.
pub enum DataSource {
    Streaming(SseSource),
    Polling(PollingSource),
    Offline,
}

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error(transparent)]
    Streaming(#[from] source::StreamError<eventsource_client::Error>),
    #[error(transparent)]
    Polling(#[from] source::PollError),
}

impl Source for DataSource {
    type Error = DataSourceError;
    type Stream = Pin<Box<dyn Stream<Item = Result<message::Message, Self::Error>> + Send>>;

    fn stream(&self) -> Self::Stream {
        match self {
            DataSource::Streaming(s) => Box::pin(s.stream().map(|r| r.map_err(DataSourceError::Streaming))),
            DataSource::Polling(p) => Box::pin(p.stream().map(|r| r.map_err(DataSourceError::Polling))),
            DataSource::Offline => Box::pin(futures::stream::pending()),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Per-flag metadata attached to an [`AllFlagsState`] entry when
/// `with_reasons` is requested.
#[derive(Clone, Debug, Serialize)]
pub struct FlagStateMeta {
    pub variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    pub version: u64,
    #[serde(rename = "trackEvents", skip_serializing_if = "is_false")]
    pub track_events: bool,
    #[serde(rename = "debugEventsUntilDate", skip_serializing_if = "Option::is_none")]
    pub debug_events_until_date: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct AllFlagsStateOptions {
    pub with_reasons: bool,
    /// Only attach metadata for flags that have tracking enabled,
    /// trimming the payload when a caller just wants reasons for the
    /// flags that actually get reported on.
    pub details_only_for_tracked_flags: bool,
}

/// The result of [`Client::all_flags_state`]: every known flag's
/// current value, plus optional per-flag metadata.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AllFlagsState {
    pub values: HashMap<String, Value>,
    pub metadata: HashMap<String, FlagStateMeta>,
}

/// Client providing the idiomatic way of retrieving variation values
/// for flags, plus the identify/track/secure-mode-hash surface a
/// calling application needs around it.
pub struct Client<ST = MemoryStore, SRC = DataSource> {
    config: Config,
    store: Arc<ST>,
    evaluator: Evaluator<Arc<ST>>,
    source: Option<SRC>,
    events: Option<Arc<EventProcessor>>,
    diagnostics: Option<DiagnosticsHandle>,
}

impl Client<MemoryStore, DataSource> {
    /// Build a client from [`Config`], wiring up the store, the
    /// streaming/polling data source it names, and (unless offline)
    /// the event processor and diagnostics worker.
    pub fn new(config: Config) -> Self {
        let config = config.normalize();
        let store = Arc::new(MemoryStore::new());

        let events = if config.offline {
            None
        } else {
            let (processor, _handle) = EventProcessor::new(EventProcessorConfig {
                events_uri: config.events_uri.clone(),
                sdk_key: config.sdk_key.clone(),
                user_agent: config.user_agent(),
                capacity: config.events_capacity,
                flush_interval: config.events_flush_interval,
                user_keys_capacity: config.user_keys_capacity,
                user_keys_flush_interval: config.user_keys_flush_interval,
                inline_users_in_events: config.inline_users_in_events,
                all_attributes_private: config.all_attributes_private,
                private_attribute_names: config.private_attribute_names.clone(),
                connect_timeout: config.connect_timeout,
                socket_timeout: config.socket_timeout,
                proxy: config.proxy.clone(),
                sampling_interval: config.sampling_interval,
            });
            Some(Arc::new(processor))
        };

        let diagnostics = if config.offline {
            None
        } else {
            let counters = events.as_ref().expect("events configured when not offline").counters();
            Some(DiagnosticsHandle::spawn(
                DiagnosticsConfig {
                    events_uri: config.events_uri.clone(),
                    sdk_key: config.sdk_key.clone(),
                    user_agent: config.user_agent(),
                    recording_interval: config.diagnostic_recording_interval,
                    connect_timeout: config.connect_timeout,
                    socket_timeout: config.socket_timeout,
                    proxy: config.proxy.clone(),
                },
                counters,
            ))
        };

        // `use_ldd` means flag data is expected to arrive via an
        // externally-populated store (a Relay Proxy writing to a
        // shared persistence layer) rather than this client talking to
        // LaunchDarkly directly, so no streaming/polling source is
        // started; events/diagnostics are unaffected.
        let source = if config.offline || config.use_ldd {
            DataSource::Offline
        } else if config.stream {
            DataSource::Streaming(SseSource::with_url(format!("{}/all", config.stream_uri), &config.sdk_key))
        } else {
            let http_client = config.http_client();
            let requestor: Arc<dyn Requestor> = Arc::new(HttpRequestor::with_client(
                config.base_uri.clone(),
                config.sdk_key.clone(),
                config.user_agent(),
                http_client,
            ));
            DataSource::Polling(PollingSource::new(requestor, config.polling_interval))
        };

        let event_sink: Option<Arc<dyn EventSink>> = events.clone().map(|e| e as Arc<dyn EventSink>);
        let evaluator = match &event_sink {
            Some(sink) => Evaluator::with_event_sink(Arc::clone(&store), Arc::clone(sink)),
            None => Evaluator::new(Arc::clone(&store)),
        };

        Self {
            config,
            store,
            evaluator,
            source: Some(source),
            events,
            diagnostics,
        }
    }
}

impl<ST, SRC> Client<ST, SRC>
where
    ST: Store,
{
    /// Build a client from custom components, bypassing [`Config`]
    /// entirely. Used by tests that wire in a fake [`Store`]/[`Source`].
    pub fn with_components<STA: Into<Arc<ST>>>(config: Config, store: STA, source: SRC) -> Self {
        let store = store.into();
        let evaluator = Evaluator::new(Arc::clone(&store));
        Self {
            config,
            evaluator,
            store,
            source: Some(source),
            events: None,
            diagnostics: None,
        }
    }

    /// Start consuming data from the configured source.
    ///
    /// Blocks the caller until either the store becomes initialized
    /// or `config.start_wait` elapses, matching the documented
    /// contract: on timeout the client is returned usable but
    /// uninitialized, since evaluation falls back to caller-supplied
    /// defaults regardless.
    pub async fn start(&mut self) -> Result<(), StartError<ST::Error>>
    where
        ST: Consumer<SRC> + Send + Sync + 'static,
        ST::Error: StdError + Clone + Send + Sync,
        SRC: Source + Send + 'static,
        SRC::Stream: Unpin + Send,
        SRC::Error: StdError + Send,
    {
        let source = self.source.take().ok_or(StartError::AlreadyStarted)?;
        let store = Arc::clone(&self.store);
        let wait = store.read_from(source);
        match tokio::time::timeout(self.config.start_wait, wait).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                warn!(
                    wait_ms = self.config.start_wait.as_millis() as u64,
                    "data source did not initialize before startWaitMillis elapsed, continuing uninitialized"
                );
                Ok(())
            }
        }
    }

    pub fn initialized(&self) -> bool {
        self.store.initialized()
    }

    pub fn flush(&self) {
        if let Some(events) = &self.events {
            events.flush();
        }
    }

    /// Idempotent: stops the event processor and diagnostics worker.
    /// The data source's background task, if still running, is left
    /// to the process shutdown (it holds no resources worth tearing
    /// down early beyond what dropping the client already releases).
    pub fn close(&mut self) {
        if let Some(events) = self.events.take() {
            events.close();
        }
        if let Some(diagnostics) = self.diagnostics.take() {
            diagnostics.stop();
        }
    }

    fn record_feature_event(&self, key: &str, user: &User, evaluation: &evaluator::Evaluation, default: Value, prereq_of: Option<String>) {
        let Some(events) = &self.events else { return };
        events.send_feature_event(FeatureEvent {
            creation_date: chrono::Utc::now().timestamp_millis(),
            key: key.to_string(),
            user: user.clone(),
            value: evaluation.value.clone(),
            variation: evaluation.variation_index,
            default,
            version: evaluation.flag_version,
            prereq_of,
            track_events: evaluation.track_events,
            debug_events_until_date: evaluation.debug_events_until_date,
            reason: evaluation.reason.clone(),
        });
    }

    fn variation_detail_value(&self, key: &str, user: &User, default: Value) -> Detail<Value> {
        let evaluation = self.evaluator.evaluate_flag(key, user);
        self.record_feature_event(key, user, &evaluation, default.clone(), None);
        match &evaluation.reason {
            Reason::Error { error_kind } => Detail::error(default, *error_kind),
            _ => evaluation.detail(),
        }
    }

    pub fn bool_variation(&self, key: &str, user: &User, default: bool) -> bool {
        self.bool_variation_detail(key, user, default).value
    }

    pub fn bool_variation_detail(&self, key: &str, user: &User, default: bool) -> Detail<bool> {
        let detail = self.variation_detail_value(key, user, Value::Bool(default));
        match detail.value.as_bool() {
            Some(value) => Detail::new(value, detail.variation_index, detail.reason),
            None => Detail::error(default, ErrorKind::WrongType),
        }
    }

    pub fn int_variation(&self, key: &str, user: &User, default: i64) -> i64 {
        self.int_variation_detail(key, user, default).value
    }

    pub fn int_variation_detail(&self, key: &str, user: &User, default: i64) -> Detail<i64> {
        let detail = self.variation_detail_value(key, user, Value::from(default));
        match detail.value.as_i64() {
            Some(value) => Detail::new(value, detail.variation_index, detail.reason),
            None => Detail::error(default, ErrorKind::WrongType),
        }
    }

    pub fn double_variation(&self, key: &str, user: &User, default: f64) -> f64 {
        self.double_variation_detail(key, user, default).value
    }

    pub fn double_variation_detail(&self, key: &str, user: &User, default: f64) -> Detail<f64> {
        let detail = self.variation_detail_value(key, user, serde_json::json!(default));
        match detail.value.as_f64() {
            Some(value) => Detail::new(value, detail.variation_index, detail.reason),
            None => Detail::error(default, ErrorKind::WrongType),
        }
    }

    pub fn string_variation(&self, key: &str, user: &User, default: impl Into<String>) -> String {
        self.string_variation_detail(key, user, default).value
    }

    pub fn string_variation_detail(&self, key: &str, user: &User, default: impl Into<String>) -> Detail<String> {
        let default = default.into();
        let detail = self.variation_detail_value(key, user, Value::String(default.clone()));
        match detail.value.as_str() {
            Some(value) => Detail::new(value.to_string(), detail.variation_index, detail.reason),
            None => Detail::error(default, ErrorKind::WrongType),
        }
    }

    pub fn json_variation(&self, key: &str, user: &User, default: Value) -> Value {
        self.json_variation_detail(key, user, default).value
    }

    /// Unlike the typed variants, any JSON value satisfies `json`, so
    /// this never produces `WRONG_TYPE`.
    pub fn json_variation_detail(&self, key: &str, user: &User, default: Value) -> Detail<Value> {
        self.variation_detail_value(key, user, default)
    }

    /// Snapshot every known flag's current value for `user`, with
    /// optional per-flag reason/version metadata. Does not emit
    /// analytics events: this is a bulk read for bootstrapping a
    /// client-side SDK, not a tracked evaluation.
    pub fn all_flags_state(&self, user: &User, options: &AllFlagsStateOptions) -> AllFlagsState {
        let mut state = AllFlagsState::default();
        for (key, flag) in self.store.all_flags() {
            let evaluation = self.evaluator.evaluate_flag(&key, user);
            state.values.insert(key.clone(), evaluation.value.clone());
            let should_attach = options.with_reasons && (!options.details_only_for_tracked_flags || evaluation.track_events);
            if should_attach {
                state.metadata.insert(
                    key,
                    FlagStateMeta {
                        variation: evaluation.variation_index,
                        reason: Some(evaluation.reason.clone()),
                        version: flag.version,
                        track_events: evaluation.track_events,
                        debug_events_until_date: evaluation.debug_events_until_date,
                    },
                );
            }
        }
        state
    }

    pub fn identify(&self, user: &User) {
        if let Some(events) = &self.events {
            events.send(Event::Identify(events::IdentifyEvent {
                creation_date: chrono::Utc::now().timestamp_millis(),
                user: user.clone(),
            }));
        }
    }

    pub fn track(&self, event_key: &str, user: &User, data: Option<Value>, metric_value: Option<f64>) {
        if let Some(events) = &self.events {
            events.send(Event::Custom(events::CustomEvent {
                creation_date: chrono::Utc::now().timestamp_millis(),
                key: event_key.to_string(),
                user: user.clone(),
                data,
                metric_value,
            }));
        }
    }

    /// `lowercase(hex(HMAC-SHA256(sdkKey, user.key)))`, used to enable
    /// LaunchDarkly's client-side secure mode.
    pub fn secure_mode_hash(&self, user: &User) -> String {
        let mut mac = Hmac::<Sha256>::new_varkey(self.config.sdk_key.as_bytes()).expect("HMAC accepts a key of any length");
        mac.update(user.key.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Look up a single flag's raw definition, for callers that need
    /// more than a variation (e.g. building custom flag-state views).
    pub fn flag(&self, key: &str) -> Option<FeatureFlag> {
        self.store.flag(key)
    }

    pub fn segment(&self, key: &str) -> Option<Segment> {
        self.store.segment(key)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::Config,
        models::Reason,
        test_utils::{FlagBuilder, NullSource},
        user::User,
        AllFlagsStateOptions, Client,
    };

    #[tokio::test]
    async fn smoke() {
        let store = crate::store::MemoryStore::new();
        let flag = FlagBuilder::default()
            .on()
            .with_key("smoke_flag")
            .add_target(1, "kalk.space")
            .add_target(1, "www.netlify.com")
            .into_inner();
        let mut flags = std::collections::HashMap::new();
        flags.insert(flag.key.clone(), flag);
        store.init(flags, std::collections::HashMap::new());

        let source = NullSource {};
        let client = Client::with_components(Config::new("test-key"), store, source);

        {
            let user = User::new("kalk.space");
            assert!(client.bool_variation("smoke_flag", &user, false));
        }
        {
            let user = User::new("app.netlify.com");
            assert!(!client.bool_variation("smoke_flag", &user, false));
        }
    }

    #[tokio::test]
    async fn unknown_flag_returns_default_with_not_found_reason() {
        let store = crate::store::MemoryStore::new();
        store.init(std::collections::HashMap::new(), std::collections::HashMap::new());
        let client = Client::with_components(Config::new("test-key"), store, NullSource {});
        let user = User::new("u1");
        let detail = client.bool_variation_detail("missing", &user, true);
        assert!(detail.value);
        assert_eq!(
            detail.reason,
            Reason::Error {
                error_kind: crate::models::ErrorKind::FlagNotFound
            }
        );
    }

    #[tokio::test]
    async fn wrong_type_falls_back_to_default() {
        let store = crate::store::MemoryStore::new();
        let flag = FlagBuilder::default()
            .on()
            .with_key("stringy")
            .with_variations(["a string"])
            .with_fallthrough_variation(0)
            .into_inner();
        let mut flags = std::collections::HashMap::new();
        flags.insert(flag.key.clone(), flag);
        store.init(flags, std::collections::HashMap::new());
        let client = Client::with_components(Config::new("test-key"), store, NullSource {});
        let user = User::new("u1");
        let detail = client.bool_variation_detail("stringy", &user, false);
        assert!(!detail.value);
        assert_eq!(
            detail.reason,
            Reason::Error {
                error_kind: crate::models::ErrorKind::WrongType
            }
        );
    }

    #[tokio::test]
    async fn all_flags_state_reports_every_flag() {
        let store = crate::store::MemoryStore::new();
        let mut flags = std::collections::HashMap::new();
        for key in ["a", "b"] {
            let flag = FlagBuilder::default().on().with_key(key).into_inner();
            flags.insert(key.to_string(), flag);
        }
        store.init(flags, std::collections::HashMap::new());
        let client = Client::with_components(Config::new("test-key"), store, NullSource {});
        let user = User::new("u1");
        let state = client.all_flags_state(&user, &AllFlagsStateOptions { with_reasons: true, ..Default::default() });
        assert_eq!(state.values.len(), 2);
        assert_eq!(state.metadata.len(), 2);
    }

    #[test]
    fn secure_mode_hash_is_deterministic() {
        let store = crate::store::MemoryStore::new();
        let client = Client::with_components(Config::new("secret"), store, NullSource {});
        let user = User::new("user-key");
        let a = client.secure_mode_hash(&user);
        let b = client.secure_mode_hash(&user);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
