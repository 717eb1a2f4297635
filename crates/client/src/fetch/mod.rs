//! Resilient HTTP fetch pipeline.
//!
//! ### Modes
//! - **Raw** ([`FetchClient::fetch`]): binary assets. No default headers;
//!   non-2xx is a (retryable) failure and the body is discarded.
//! - **Envelope** ([`FetchClient::send`]): JSON API calls with
//!   `Accept`/`Content-Type: application/json` defaults, decoded into an
//!   [`Envelope`].
//! - **Download** ([`FetchClient::download`]): a `200` body is written to
//!   the download directory.
//!
//! ### Resilience
//! - Optional bounded retry with exponential backoff
//! - Cancellation by caller token or client-wide abort
//! - Optional per-attempt timeout and a streamed body size limit

pub mod download;
pub mod envelope;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod request;
pub mod retry;
pub mod transport;
pub mod url;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use assetry_core::{AppConfig, BinaryResource, Error, OriginHeaders};

pub use envelope::Envelope;
pub use request::{FetchRequest, ProgressFn};
pub use retry::{RetryPolicy, RetryState};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

use request::merge_headers;
use retry::Abort;

const JSON_DEFAULTS: &[(&str, &str)] = &[("Accept", "application/json"), ("Content-Type", "application/json")];

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "assetry/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 256MiB)
    pub max_bytes: usize,

    /// Per-attempt timeout (default: none)
    pub timeout: Option<Duration>,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Base URL for relative API paths
    pub base_url: Option<::url::Url>,

    /// Directory downloads are written to
    pub download_dir: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "assetry/0.1".to_string(),
            max_bytes: 256 * 1024 * 1024,
            timeout: None,
            max_redirects: 5,
            base_url: None,
            download_dir: PathBuf::from("./downloads"),
        }
    }
}

impl FetchConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, Error> {
        Ok(Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: config.max_redirects,
            base_url: config.api_base_url().map_err(|e| Error::InvalidInput(e.to_string()))?,
            download_dir: config.download_dir.clone(),
        })
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The canonical URL requested
    pub url: ::url::Url,
    /// HTTP status code
    pub status: u16,
    /// Response headers, lowercase names
    pub headers: Vec<(String, String)>,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Time taken to fetch in milliseconds, retries included
    pub fetch_ms: u64,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        transport::find_header(&self.headers, name)
    }

    /// Caching directives sent by the origin.
    pub fn origin_headers(&self) -> OriginHeaders {
        OriginHeaders {
            cache_control: self.header("cache-control").map(str::to_string),
            expires: self.header("expires").map(str::to_string),
        }
    }

    pub fn into_resource(self) -> BinaryResource {
        BinaryResource::new(self.bytes, self.content_type)
    }
}

/// Whether an origin serves partial content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSupport {
    /// `206`; total size from `Content-Range` when the origin reports it.
    Partial { total: Option<u64> },
    /// `200`; the origin ignored the range.
    FullOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusRule {
    Success,
    Any,
}

/// HTTP fetch client with retry and cancellation.
#[derive(Debug)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    in_flight: Mutex<CancellationToken>,
}

impl FetchClient {
    /// Create a new fetch client backed by reqwest.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: FetchConfig, transport: Arc<dyn Transport>) -> Self {
        Self { transport, config, in_flight: Mutex::new(CancellationToken::new()) }
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Cancel every transfer currently running through this client.
    ///
    /// Models connectivity loss and navigation. Calls started afterwards
    /// are unaffected.
    pub fn abort_in_flight(&self) {
        let previous = std::mem::take(&mut *self.in_flight.lock());
        previous.cancel();
        tracing::warn!("aborted in-flight requests");
    }

    fn abort_for(&self, request: &FetchRequest) -> Abort {
        Abort::new(self.in_flight.lock().clone(), request.cancel.clone())
    }

    /// Fetch a binary asset.
    ///
    /// JSON defaults are not applied; only the caller's headers are sent.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        let headers = request.headers.clone();
        self.execute(&request, headers, StatusRule::Success).await
    }

    /// Call a JSON API endpoint and decode its envelope.
    pub async fn send<T: DeserializeOwned>(&self, request: FetchRequest) -> Result<Envelope<T>, Error> {
        let headers = merge_headers(JSON_DEFAULTS, &request.headers);
        let response = self.execute(&request, headers, StatusRule::Any).await?;
        envelope::decode(response.status, &response.bytes).inspect_err(|e| {
            tracing::warn!(url = %response.url, error = %e, "api call failed");
        })
    }

    /// Like [`send`](Self::send), transforming the payload.
    pub async fn send_with<T, U>(
        &self, request: FetchRequest, transform: impl FnOnce(T) -> U,
    ) -> Result<Envelope<U>, Error>
    where
        T: DeserializeOwned,
    {
        Ok(self.send::<T>(request).await?.map(transform))
    }

    /// Fetch and save to the download directory.
    ///
    /// Only an exact `200` is saved, under the `Content-Disposition`
    /// filename or `fallback_name`. Returns whether a file was written.
    pub async fn download(&self, request: FetchRequest, fallback_name: &str) -> Result<bool, Error> {
        let headers = request.headers.clone();
        let response = self.execute(&request, headers, StatusRule::Any).await?;
        if response.status != 200 {
            tracing::debug!(url = %response.url, status = response.status, "download skipped");
            return Ok(false);
        }

        let filename = response
            .header("content-disposition")
            .and_then(download::filename_from_disposition)
            .unwrap_or_else(|| fallback_name.to_string());
        download::save(&self.config.download_dir, &filename, &response.bytes).await?;
        Ok(true)
    }

    /// Ask the origin for the first two bytes to learn whether it serves
    /// partial content.
    pub async fn probe_range(&self, target: &str) -> Result<RangeSupport, Error> {
        let request = FetchRequest::get(target).header("Range", "bytes=0-1");
        let headers = request.headers.clone();
        let response = self.execute(&request, headers, StatusRule::Any).await?;

        match response.status {
            206 => {
                let total = response.header("content-range").and_then(parse_content_range_total);
                Ok(RangeSupport::Partial { total })
            }
            200 => Ok(RangeSupport::FullOnly),
            status => Err(Error::HttpStatus { status, url: response.url.to_string() }),
        }
    }

    async fn execute(
        &self, request: &FetchRequest, headers: Vec<(String, String)>, rule: StatusRule,
    ) -> Result<FetchResponse, Error> {
        let url = url::resolve(self.config.base_url.as_ref(), &request.target)?;
        let abort = self.abort_for(request);
        let start = Instant::now();

        let result = {
            let (url, headers, abort) = (&url, &headers, &abort);
            retry::run(request.retry, abort, url.as_str(), move || {
                self.attempt(request, url, headers, abort, rule)
            })
            .await
        };

        match &result {
            Ok(response) => tracing::debug!(
                url = %url,
                status = response.status,
                bytes = response.bytes.len(),
                fetch_ms = start.elapsed().as_millis() as u64,
                "fetched"
            ),
            Err(e) if e.is_cancelled() => tracing::warn!(url = %url, error = %e, "fetch cancelled"),
            Err(e) => tracing::warn!(url = %url, error = %e, "fetch failed"),
        }

        result.map(|mut response| {
            response.fetch_ms = start.elapsed().as_millis() as u64;
            response
        })
    }

    async fn attempt(
        &self, request: &FetchRequest, url: &::url::Url, headers: &[(String, String)], abort: &Abort, rule: StatusRule,
    ) -> Result<FetchResponse, Error> {
        let exchange = async {
            let response = self
                .transport
                .execute(TransportRequest {
                    method: request.method.clone(),
                    url: url.clone(),
                    headers: headers.to_vec(),
                    body: request.body.clone(),
                })
                .await?;

            if rule == StatusRule::Success && !(200..300).contains(&response.status) {
                return Err(Error::HttpStatus { status: response.status, url: url.to_string() });
            }

            let status = response.status;
            let content_type = response.header("content-type").map(str::to_string);
            let headers = response.headers.clone();
            let bytes = self.read_body(response, request.progress.as_ref()).await?;

            Ok(FetchResponse { url: url.clone(), status, headers, content_type, bytes, fetch_ms: 0 })
        };

        let timeout = request.timeout.or(self.config.timeout);
        abort
            .guard(url.as_str(), async {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, exchange)
                        .await
                        .map_err(|_| Error::Timeout(format!("{url}: no response within {}ms", limit.as_millis())))?,
                    None => exchange.await,
                }
            })
            .await
    }

    async fn read_body(&self, response: TransportResponse, progress: Option<&ProgressFn>) -> Result<Bytes, Error> {
        let max_bytes = self.config.max_bytes;
        let total = response.content_length;
        if let Some(len) = total
            && len > max_bytes as u64
        {
            return Err(Error::TooLarge(format!("{len} bytes exceeds {max_bytes}")));
        }

        let mut body = response.body;
        let mut buf = BytesMut::with_capacity(total.map_or(0, |len| len as usize));
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > max_bytes {
                return Err(Error::TooLarge(format!("more than {max_bytes} bytes")));
            }
            buf.extend_from_slice(&chunk);
            if let Some(progress) = progress {
                progress(buf.len() as u64, total);
            }
        }
        Ok(buf.freeze())
    }
}

/// Total length from a `Content-Range: bytes 0-1/12345` value.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}
