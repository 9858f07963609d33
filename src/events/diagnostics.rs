//! Periodic `diagnostic` delivery: one `diagnostic-init` event at
//! startup, then a `diagnostic` statistics event every recording
//! interval, summarizing counters the event processor maintains.

use crate::config::{build_http_client, ProxyConfig};
use super::processor::Counters;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct DiagnosticsConfig {
    pub events_uri: String,
    pub sdk_key: String,
    pub user_agent: String,
    pub recording_interval: Duration,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            events_uri: "https://events.launchdarkly.com".to_string(),
            sdk_key: String::new(),
            user_agent: format!("RustServerSDK/{}", env!("CARGO_PKG_VERSION")),
            recording_interval: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(10),
            proxy: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
enum DiagnosticEvent {
    #[serde(rename = "diagnostic-init")]
    Init { creation_date: i64 },
    #[serde(rename = "diagnostic")]
    Statistics {
        #[serde(rename = "dataSinceDate")]
        data_since_date: i64,
        #[serde(rename = "creationDate")]
        creation_date: i64,
        #[serde(rename = "droppedEvents")]
        dropped_events: u64,
        #[serde(rename = "deduplicatedUsers")]
        deduplicated_users: u64,
        #[serde(rename = "eventsInLastBatch")]
        events_in_last_batch: u64,
    },
}

/// Handle to the spawned diagnostics task. Dropping it does not stop
/// the task; call [`DiagnosticsHandle::stop`] to abort it explicitly,
/// mirroring how the event processor is closed.
pub struct DiagnosticsHandle {
    join: JoinHandle<()>,
}

impl DiagnosticsHandle {
    pub fn spawn(config: DiagnosticsConfig, counters: Arc<Counters>) -> Self {
        let join = tokio::spawn(run(config, counters));
        Self { join }
    }

    pub fn stop(self) {
        self.join.abort();
    }
}

async fn run(config: DiagnosticsConfig, counters: Arc<Counters>) {
    let client = build_http_client(config.connect_timeout, config.socket_timeout, config.proxy.as_ref());
    let start = chrono::Utc::now().timestamp_millis();
    let mut data_since_date = start;

    post(&client, &config, &DiagnosticEvent::Init { creation_date: start }).await;

    let mut interval = tokio::time::interval(config.recording_interval);
    interval.tick().await; // first tick fires immediately; skip it, init already sent
    loop {
        interval.tick().await;
        let now = chrono::Utc::now().timestamp_millis();
        let stats = DiagnosticEvent::Statistics {
            data_since_date,
            creation_date: now,
            dropped_events: counters.dropped_events.swap(0, Ordering::Relaxed),
            deduplicated_users: counters.deduplicated_users.swap(0, Ordering::Relaxed),
            events_in_last_batch: counters.events_in_last_batch.load(Ordering::Relaxed),
        };
        post(&client, &config, &stats).await;
        data_since_date = now;
    }
}

async fn post(client: &reqwest::Client, config: &DiagnosticsConfig, event: &DiagnosticEvent) {
    let url = format!("{}/diagnostic", config.events_uri);
    let result = client
        .post(&url)
        .header("Authorization", config.sdk_key.clone())
        .header("User-Agent", config.user_agent.clone())
        .header("Content-Type", "application/json")
        .header("X-LaunchDarkly-Event-Schema", "3")
        .json(event)
        .send()
        .await;
    if let Err(err) = result {
        debug!(%err, "diagnostic event delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_recording_interval_is_fifteen_minutes() {
        assert_eq!(DiagnosticsConfig::default().recording_interval, Duration::from_secs(900));
    }
}
