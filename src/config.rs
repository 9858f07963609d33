//! Ambient configuration: the options a calling application sets when
//! constructing a client. Kept as one plain struct with public fields
//! and a `Default` impl carrying the documented defaults — the
//! generated client's prior `build.rs`-driven configuration plumbing
//! is gone, but explicit config values passed through construction
//! replace the global singletons it implied.

use std::time::Duration;
use tracing::warn;

const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(30);
const MIN_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(60);

/// Construction-time options for [`crate::Client`].
///
/// There is deliberately no fluent builder here: every field is
/// public and `Config::default()` plus direct field assignment covers
/// every documented option. `pollingIntervalMillis` and
/// `diagnosticRecordingIntervalMillis` are floored to their documented
/// minimums by [`Config::normalize`], which the client calls before
/// wiring up its workers.
#[derive(Clone, Debug)]
pub struct Config {
    pub sdk_key: String,
    pub offline: bool,
    pub stream: bool,
    pub base_uri: String,
    pub stream_uri: String,
    pub events_uri: String,
    pub polling_interval: Duration,
    pub reconnect_time: Duration,
    pub start_wait: Duration,
    pub events_capacity: usize,
    pub events_flush_interval: Duration,
    pub user_keys_capacity: usize,
    pub user_keys_flush_interval: Duration,
    pub inline_users_in_events: bool,
    pub all_attributes_private: bool,
    pub private_attribute_names: Vec<String>,
    pub diagnostic_recording_interval: Duration,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub sampling_interval: u32,
    pub use_ldd: bool,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Config {
    pub fn new(sdk_key: impl Into<String>) -> Self {
        Self {
            sdk_key: sdk_key.into(),
            ..Self::default()
        }
    }

    /// Floor `polling_interval`/`diagnostic_recording_interval` to
    /// their documented minimums. Called once at client construction
    /// so a caller's too-aggressive setting can't be honored.
    pub fn normalize(mut self) -> Self {
        self.polling_interval = self.polling_interval.max(MIN_POLLING_INTERVAL);
        self.diagnostic_recording_interval = self
            .diagnostic_recording_interval
            .max(MIN_DIAGNOSTIC_RECORDING_INTERVAL);
        self
    }

    pub fn user_agent(&self) -> String {
        format!("RustServerSDK/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Builds a `reqwest::Client` honoring `connect_timeout`,
    /// `socket_timeout`, and `proxy`. Every HTTP client the crate
    /// constructs (polling requestor, event delivery, diagnostics)
    /// goes through this (or [`build_http_client`] directly, for
    /// workers that only carry the relevant fields rather than a full
    /// `Config`) so the three stay consistent.
    pub fn http_client(&self) -> reqwest::Client {
        build_http_client(self.connect_timeout, self.socket_timeout, self.proxy.as_ref())
    }
}

/// Shared by every HTTP client construction site in the crate. Falls
/// back to an unconfigured client (logging a warning) if the proxy URL
/// can't be parsed, rather than failing client construction outright.
pub fn build_http_client(connect_timeout: Duration, socket_timeout: Duration, proxy: Option<&ProxyConfig>) -> reqwest::Client {
    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(connect_timeout)
        .timeout(socket_timeout);
    if let Some(proxy) = proxy {
        match build_proxy(proxy) {
            Ok(p) => builder = builder.proxy(p),
            Err(err) => warn!(%err, "ignoring invalid proxy configuration"),
        }
    }
    builder.build().unwrap_or_else(|err| {
        warn!(%err, "failed to build configured http client, falling back to defaults");
        reqwest::Client::new()
    })
}

fn build_proxy(proxy: &ProxyConfig) -> reqwest::Result<reqwest::Proxy> {
    let mut p = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))?;
    if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
        p = p.basic_auth(username, password);
    }
    Ok(p)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sdk_key: String::new(),
            offline: false,
            stream: true,
            base_uri: "https://sdk.launchdarkly.com".to_string(),
            stream_uri: "https://stream.launchdarkly.com".to_string(),
            events_uri: "https://events.launchdarkly.com".to_string(),
            polling_interval: MIN_POLLING_INTERVAL,
            reconnect_time: Duration::from_secs(1),
            start_wait: Duration::from_secs(5),
            events_capacity: 10_000,
            events_flush_interval: Duration::from_secs(5),
            user_keys_capacity: 1_000,
            user_keys_flush_interval: Duration::from_secs(300),
            inline_users_in_events: false,
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
            diagnostic_recording_interval: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(10),
            sampling_interval: 0,
            use_ldd: false,
            proxy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!(config.stream);
        assert!(!config.offline);
        assert_eq!(config.polling_interval, Duration::from_secs(30));
        assert_eq!(config.start_wait, Duration::from_secs(5));
        assert_eq!(config.events_capacity, 10_000);
        assert_eq!(config.user_keys_flush_interval, Duration::from_secs(300));
        assert_eq!(config.diagnostic_recording_interval, Duration::from_secs(900));
    }

    #[test]
    fn normalize_floors_intervals_to_documented_minimums() {
        let config = Config {
            polling_interval: Duration::from_secs(1),
            diagnostic_recording_interval: Duration::from_secs(1),
            ..Config::new("key")
        }
        .normalize();
        assert_eq!(config.polling_interval, MIN_POLLING_INTERVAL);
        assert_eq!(config.diagnostic_recording_interval, MIN_DIAGNOSTIC_RECORDING_INTERVAL);
    }
}
