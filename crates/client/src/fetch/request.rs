//! Builder for a single fetch call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use assetry_core::Error;

use super::retry::RetryPolicy;

/// Progress callback receiving `(loaded, total)` byte counts per chunk.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// A request to be executed by [`FetchClient`](super::FetchClient).
///
/// The target is either an absolute URL or a path starting with `/`, which
/// is resolved against the configured API base URL.
#[derive(Clone)]
pub struct FetchRequest {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<Bytes>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) cache_ttl: Option<Duration>,
}

impl FetchRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: None,
            retry: None,
            cancel: None,
            timeout: None,
            progress: None,
            cache_ttl: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    /// Retry failed attempts up to `max_attempts` more times, doubling the
    /// wait after each one.
    pub fn with_retry(self, max_attempts: u32, initial_delay: Duration) -> Self {
        self.with_retry_policy(RetryPolicy::new(max_attempts, initial_delay))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Abort the call when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Per-attempt timeout; overrides the client default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Serve GET responses from the `request` store for up to `ttl` when the
    /// origin does not send its own `Expires`.
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Attach credentials. A three-segment JWT goes into `Authorization`,
    /// anything else is sent as an access key.
    pub fn token(self, token: &str) -> Self {
        if token.split('.').count() == 3 {
            self.header("Authorization", format!("Bearer {token}"))
        } else {
            self.header("x-access-key", token)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// JSON-encode `body` as the request payload.
    pub fn body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, Error> {
        let encoded = serde_json::to_vec(body).map_err(|e| Error::InvalidInput(format!("unserializable body: {e}")))?;
        self.body = Some(Bytes::from(encoded));
        Ok(self)
    }

    pub fn raw_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn retry(&self) -> Option<RetryPolicy> {
        self.retry
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

/// Overlay `caller` onto `defaults`; a caller header replaces every default
/// with the same name.
pub(crate) fn merge_headers(defaults: &[(&str, &str)], caller: &[(String, String)]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .filter(|(name, _)| !caller.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    merged.extend(caller.iter().cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_jwt_uses_bearer() {
        let req = FetchRequest::get("/api/comment").token("aaa.bbb.ccc");
        assert_eq!(req.headers(), &[("Authorization".to_string(), "Bearer aaa.bbb.ccc".to_string())]);
    }

    #[test]
    fn test_token_other_uses_access_key() {
        let req = FetchRequest::get("/api/comment").token("abcdef");
        assert_eq!(req.headers(), &[("x-access-key".to_string(), "abcdef".to_string())]);

        let req = FetchRequest::get("/api/comment").token("a.b");
        assert_eq!(req.headers()[0].0, "x-access-key");
    }

    #[test]
    fn test_json_body() {
        let req = FetchRequest::post("/api/comment")
            .body(&serde_json::json!({"name": "ana"}))
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(br#"{"name":"ana"}"#.as_slice()));
        assert_eq!(req.method(), &Method::POST);
    }

    #[test]
    fn test_merge_headers_caller_replaces_default() {
        let caller = vec![("accept".to_string(), "image/*".to_string())];
        let merged = merge_headers(&[("Accept", "application/json"), ("Content-Type", "application/json")], &caller);
        assert_eq!(
            merged,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("accept".to_string(), "image/*".to_string()),
            ]
        );
    }

    #[test]
    fn test_builder_options() {
        let req = FetchRequest::get("https://cdn.example.com/a.gif")
            .with_retry(3, Duration::from_millis(1000))
            .with_timeout(Duration::from_secs(5))
            .with_cache(Duration::from_secs(60));
        assert_eq!(req.retry(), Some(RetryPolicy::new(3, Duration::from_millis(1000))));
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
        assert_eq!(req.cache_ttl(), Some(Duration::from_secs(60)));
    }
}
