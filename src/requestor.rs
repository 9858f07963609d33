//! Abstraction over the polling HTTP endpoints, shared by
//! [`crate::source::PollingSource`] and by the streaming source's
//! resolution of `indirect/put`/`indirect/patch` messages (which name
//! a path but carry no payload).

use crate::models::{FeatureFlag, Segment};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected the SDK key")]
    Unauthorized,
    #[error("server returned {0}")]
    Status(u16),
}

impl RequestError {
    /// Per the shared HTTP-status retry policy: 401/403 are permanent,
    /// everything else this crate models as a retryable failure.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RequestError::Unauthorized)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PollResponse {
    pub flags: HashMap<String, FeatureFlag>,
    pub segments: HashMap<String, Segment>,
}

pub trait Requestor: Send + Sync + fmt::Debug {
    fn fetch_all(&self) -> BoxFuture<'_, Result<Option<PollResponse>, RequestError>>;
    fn fetch_flag(&self, key: &str) -> BoxFuture<'_, Result<Option<FeatureFlag>, RequestError>>;
    fn fetch_segment(&self, key: &str) -> BoxFuture<'_, Result<Option<Segment>, RequestError>>;
}

/// `reqwest`-backed [`Requestor`]. ETag-caches the full-fetch endpoint
/// so a `304` is reported as "no update" (`Ok(None)`) to the caller.
#[derive(Debug)]
pub struct HttpRequestor {
    client: reqwest::Client,
    base_uri: String,
    sdk_key: String,
    user_agent: String,
    etag: std::sync::Mutex<Option<String>>,
}

impl HttpRequestor {
    pub fn new(base_uri: impl Into<String>, sdk_key: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self::with_client(base_uri, sdk_key, user_agent, reqwest::Client::new())
    }

    /// Same as [`Self::new`], but with a pre-built client — used by the
    /// real client so `connect_timeout`/`socket_timeout`/`proxy` apply
    /// to polling requests too.
    pub fn with_client(
        base_uri: impl Into<String>,
        sdk_key: impl Into<String>,
        user_agent: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            client,
            base_uri: base_uri.into(),
            sdk_key: sdk_key.into(),
            user_agent: user_agent.into(),
            etag: std::sync::Mutex::new(None),
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_uri, path))
            .header("Authorization", self.sdk_key.clone())
            .header("User-Agent", self.user_agent.clone())
    }

    async fn status_to_result(resp: reqwest::Response) -> Result<reqwest::Response, RequestError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RequestError::Unauthorized);
        }
        if !status.is_success() && status != reqwest::StatusCode::NOT_MODIFIED {
            return Err(RequestError::Status(status.as_u16()));
        }
        Ok(resp)
    }
}

#[derive(serde::Deserialize)]
struct AllData {
    #[serde(default)]
    flags: HashMap<String, FeatureFlag>,
    #[serde(default)]
    segments: HashMap<String, Segment>,
}

impl Requestor for HttpRequestor {
    fn fetch_all(&self) -> BoxFuture<'_, Result<Option<PollResponse>, RequestError>> {
        Box::pin(async move {
            let mut req = self.request("/sdk/latest-all");
            if let Some(etag) = self.etag.lock().unwrap().clone() {
                req = req.header("If-None-Match", etag);
            }
            let resp = Self::status_to_result(req.send().await?).await?;
            if resp.status() == reqwest::StatusCode::NOT_MODIFIED {
                return Ok(None);
            }
            if let Some(etag) = resp.headers().get(reqwest::header::ETAG) {
                if let Ok(etag) = etag.to_str() {
                    *self.etag.lock().unwrap() = Some(etag.to_string());
                }
            }
            let data: AllData = resp.json().await?;
            Ok(Some(PollResponse {
                flags: data.flags,
                segments: data.segments,
            }))
        })
    }

    fn fetch_flag(&self, key: &str) -> BoxFuture<'_, Result<Option<FeatureFlag>, RequestError>> {
        let path = format!("/sdk/latest-flags/{}", key);
        Box::pin(async move {
            let resp = self.request(&path).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let resp = Self::status_to_result(resp).await?;
            Ok(Some(resp.json().await?))
        })
    }

    fn fetch_segment(&self, key: &str) -> BoxFuture<'_, Result<Option<Segment>, RequestError>> {
        let path = format!("/sdk/latest-segments/{}", key);
        Box::pin(async move {
            let resp = self.request(&path).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let resp = Self::status_to_result(resp).await?;
            Ok(Some(resp.json().await?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_permanent() {
        assert!(RequestError::Unauthorized.is_permanent());
        assert!(!RequestError::Status(500).is_permanent());
    }
}
