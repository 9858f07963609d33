//! Bounded-queue background worker: batches, summarizes, redacts, and
//! delivers analytic events.

use super::model::{CustomOutput, Event, FeatureOutput, OutputEvent, UserOutput};
use super::redact::redact;
use super::summarizer::EventSummarizer;
use super::user_keys::UserKeyCache;
use crate::config::{build_http_client, ProxyConfig};
use crate::evaluator::EventSink;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Clone, Debug)]
pub struct EventProcessorConfig {
    pub events_uri: String,
    pub sdk_key: String,
    pub user_agent: String,
    pub capacity: usize,
    pub flush_interval: Duration,
    pub user_keys_capacity: usize,
    pub user_keys_flush_interval: Duration,
    pub inline_users_in_events: bool,
    pub all_attributes_private: bool,
    pub private_attribute_names: Vec<String>,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub proxy: Option<ProxyConfig>,
    /// If greater than 1, only 1 in every `sampling_interval` feature
    /// events is queued for delivery (summary counters still see
    /// every evaluation). `0` or `1` disables sampling.
    pub sampling_interval: u32,
}

impl Default for EventProcessorConfig {
    fn default() -> Self {
        Self {
            events_uri: "https://events.launchdarkly.com".to_string(),
            sdk_key: String::new(),
            user_agent: format!("RustServerSDK/{}", env!("CARGO_PKG_VERSION")),
            capacity: 10_000,
            flush_interval: Duration::from_secs(5),
            user_keys_capacity: 1_000,
            user_keys_flush_interval: Duration::from_secs(300),
            inline_users_in_events: false,
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
            connect_timeout: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(10),
            proxy: None,
            sampling_interval: 0,
        }
    }
}

/// Diagnostic counters updated by the worker and read periodically by
/// [`super::diagnostics`]. Reset points are the diagnostics module's
/// responsibility, not the processor's.
#[derive(Default)]
pub(crate) struct Counters {
    pub dropped_events: AtomicU64,
    pub deduplicated_users: AtomicU64,
    pub events_in_last_batch: AtomicU64,
}

enum Command {
    Send(Event),
    Flush,
    Close,
}

/// Producer handle. Cloning is not supported directly; share via
/// `Arc<EventProcessor>` the way the rest of the crate shares stores.
pub struct EventProcessor {
    sender: mpsc::Sender<Command>,
    stopped: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl EventProcessor {
    pub fn new(config: EventProcessorConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.capacity);
        let stopped = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let client = build_http_client(config.connect_timeout, config.socket_timeout, config.proxy.as_ref());
        let worker = Worker {
            config,
            receiver,
            summarizer: EventSummarizer::new(),
            user_keys: UserKeyCache::new(1_000),
            pending: Vec::new(),
            client,
            stopped: Arc::clone(&stopped),
            counters: Arc::clone(&counters),
            last_server_time: AtomicI64::new(0),
        };
        let handle = tokio::spawn(worker.run());
        (
            Self {
                sender,
                stopped,
                counters,
            },
            handle,
        )
    }

    /// Non-blocking enqueue. Drops the event and counts it if the
    /// queue is full or the processor has permanently stopped.
    pub fn send(&self, event: Event) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        if self.sender.try_send(Command::Send(event)).is_err() {
            self.counters.dropped_events.fetch_add(1, Ordering::Relaxed);
            warn!("event queue full, dropping event");
        }
    }

    pub fn flush(&self) {
        let _ = self.sender.try_send(Command::Flush);
    }

    pub fn close(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        let _ = self.sender.try_send(Command::Close);
    }

    pub(crate) fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

impl EventSink for EventProcessor {
    fn send_feature_event(&self, event: super::model::FeatureEvent) {
        self.send(Event::Feature(event));
    }
}

struct Worker {
    config: EventProcessorConfig,
    receiver: mpsc::Receiver<Command>,
    summarizer: EventSummarizer,
    user_keys: UserKeyCache,
    pending: Vec<OutputEvent>,
    client: reqwest::Client,
    stopped: Arc<AtomicBool>,
    counters: Arc<Counters>,
    last_server_time: AtomicI64,
}

impl Worker {
    async fn run(mut self) {
        self.user_keys = UserKeyCache::new(self.config.user_keys_capacity);
        let mut flush_interval = tokio::time::interval(self.config.flush_interval);
        flush_interval.tick().await; // first tick fires immediately
        let mut user_keys_interval = tokio::time::interval(self.config.user_keys_flush_interval);
        user_keys_interval.tick().await;
        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(Command::Send(event)) => {
                            self.record(event);
                            if self.pending.len() >= self.config.capacity {
                                self.flush().await;
                            }
                        }
                        Some(Command::Flush) => self.flush().await,
                        Some(Command::Close) | None => {
                            self.flush().await;
                            return;
                        }
                    }
                }
                _ = flush_interval.tick() => {
                    self.flush().await;
                }
                _ = user_keys_interval.tick() => {
                    self.user_keys.clear();
                }
            }
        }
    }

    fn record(&mut self, event: Event) {
        match event {
            Event::Feature(feature) => {
                self.index_if_new(&feature.user);
                let debug_now = feature
                    .debug_events_until_date
                    .map(|until| until > self.last_server_time.load(Ordering::Relaxed))
                    .unwrap_or(false);
                let track = feature.track_events;
                self.summarizer.add(&feature);
                if track && self.should_sample() {
                    self.pending
                        .push(OutputEvent::Feature(self.feature_output(&feature, false)));
                }
                if debug_now {
                    self.pending
                        .push(OutputEvent::Debug(self.feature_output(&feature, true)));
                }
            }
            Event::Identify(identify) => {
                self.user_keys.notice(&identify.user.key);
                self.pending.push(OutputEvent::Identify(UserOutput {
                    creation_date: identify.creation_date,
                    user: self.redact(&identify.user),
                }));
            }
            Event::Custom(custom) => {
                self.index_if_new(&custom.user);
                let user_key = if self.config.inline_users_in_events {
                    None
                } else {
                    Some(custom.user.key.clone())
                };
                let user = if self.config.inline_users_in_events {
                    Some(self.redact(&custom.user))
                } else {
                    None
                };
                self.pending.push(OutputEvent::Custom(CustomOutput {
                    creation_date: custom.creation_date,
                    key: custom.key,
                    user_key,
                    user,
                    data: custom.data,
                    metric_value: custom.metric_value,
                }));
            }
        }
    }

    /// `sampling_interval` of 0 or 1 sends every event; above that,
    /// only 1 in `sampling_interval` full feature events is queued.
    fn should_sample(&self) -> bool {
        match self.config.sampling_interval {
            0 | 1 => true,
            n => rand::thread_rng().gen_range(0..n) == 0,
        }
    }

    fn index_if_new(&mut self, user: &crate::user::User) {
        if self.config.inline_users_in_events {
            return;
        }
        if self.user_keys.notice(&user.key) {
            self.pending.push(OutputEvent::Index(UserOutput {
                creation_date: chrono::Utc::now().timestamp_millis(),
                user: self.redact(user),
            }));
        } else {
            self.counters.deduplicated_users.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn feature_output(&self, feature: &super::model::FeatureEvent, force_full_user: bool) -> FeatureOutput {
        let (user_key, user) = if self.config.inline_users_in_events || force_full_user {
            (None, Some(self.redact(&feature.user)))
        } else {
            (Some(feature.user.key.clone()), None)
        };
        FeatureOutput {
            creation_date: feature.creation_date,
            key: feature.key.clone(),
            user_key,
            user,
            value: feature.value.clone(),
            variation: feature.variation,
            default: feature.default.clone(),
            version: feature.version,
            prereq_of: feature.prereq_of.clone(),
            track_events: feature.track_events,
        }
    }

    fn redact(&self, user: &crate::user::User) -> super::redact::RedactedUser {
        redact(
            user,
            self.config.all_attributes_private,
            &self.config.private_attribute_names,
        )
    }

    async fn flush(&mut self) {
        if let Some(summary) = self.summarizer.finish() {
            self.pending.push(OutputEvent::Summary(summary));
        }
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        self.counters
            .events_in_last_batch
            .store(batch.len() as u64, Ordering::Relaxed);
        self.deliver(batch).await;
    }

    async fn deliver(&mut self, batch: Vec<OutputEvent>) {
        let url = format!("{}/bulk", self.config.events_uri);
        let send_once = |client: &reqwest::Client, batch: &[OutputEvent]| {
            client
                .post(&url)
                .header("Authorization", self.config.sdk_key.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .header("Content-Type", "application/json")
                .header("X-LaunchDarkly-Event-Schema", "3")
                .json(batch)
                .send()
        };

        for attempt_no in 0..2 {
            let result = send_once(&self.client, &batch).await;
            match result {
                Ok(resp) if resp.status() == 401 || resp.status() == 403 => {
                    warn!(status = %resp.status(), "event delivery rejected, stopping event sending");
                    self.stopped.store(true, Ordering::Relaxed);
                    return;
                }
                Ok(resp) if resp.status().is_success() => {
                    if let Some(date) = resp.headers().get(http::header::DATE) {
                        if let Ok(text) = date.to_str() {
                            if let Ok(parsed) = chrono::DateTime::parse_from_rfc2822(text) {
                                self.last_server_time
                                    .store(parsed.timestamp_millis(), Ordering::Relaxed);
                            }
                        }
                    }
                    trace!(count = batch.len(), "delivered event batch");
                    return;
                }
                Ok(resp) => {
                    debug!(status = %resp.status(), attempt_no, "event delivery failed, retrying");
                }
                Err(err) => {
                    debug!(%err, attempt_no, "event delivery failed, retrying");
                }
            }
        }
        warn!(count = batch.len(), "event delivery failed twice, dropping batch");
        self.counters
            .dropped_events
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_documented_values() {
        let config = EventProcessorConfig::default();
        assert_eq!(config.capacity, 10_000);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.user_keys_capacity, 1_000);
        assert_eq!(config.user_keys_flush_interval, Duration::from_secs(300));
        assert!(!config.inline_users_in_events);
        assert_eq!(config.sampling_interval, 0);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.socket_timeout, Duration::from_secs(10));
    }

    fn test_worker(sampling_interval: u32) -> Worker {
        let (_sender, receiver) = mpsc::channel(1);
        Worker {
            config: EventProcessorConfig {
                sampling_interval,
                ..EventProcessorConfig::default()
            },
            receiver,
            summarizer: EventSummarizer::new(),
            user_keys: UserKeyCache::new(10),
            pending: Vec::new(),
            client: reqwest::Client::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            last_server_time: AtomicI64::new(0),
        }
    }

    #[test]
    fn sampling_interval_zero_or_one_always_samples() {
        assert!(test_worker(0).should_sample());
        assert!(test_worker(1).should_sample());
    }

    #[test]
    fn pending_reaches_capacity_after_enough_records() {
        let mut worker = test_worker(0);
        worker.config.capacity = 2;
        for i in 0..2 {
            worker.record(Event::Identify(super::super::model::IdentifyEvent {
                creation_date: 0,
                user: crate::user::User::new(format!("u{}", i)),
            }));
        }
        assert!(worker.pending.len() >= worker.config.capacity);
    }
}
