//! The HTTP seam of the fetch client.
//!
//! [`FetchClient`](super::FetchClient) never talks to reqwest directly; it
//! hands a [`TransportRequest`] to a [`Transport`] and reads the streamed
//! body back. Retry, cancellation, timeouts and size limits are layered on
//! top by the client, so an implementation only performs one exchange.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::{Client, Method};
use url::Url;

use assetry_core::Error;

use super::FetchConfig;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, Error>>;

/// One outgoing HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

/// Status line and headers of a response whose body has not been read yet.
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl TransportResponse {
    /// First value of a header, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Performs a single HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error>;
}

/// Production transport backed by reqwest with rustls.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        let mut builder = self.http.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();

        Ok(TransportResponse {
            status: response.status().as_u16(),
            headers,
            content_length: response.content_length(),
            body: response.bytes_stream().map(|chunk| chunk.map_err(map_reqwest_error)).boxed(),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() { Error::Timeout(err.to_string()) } else { Error::Network(err.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_case_insensitive() {
        let headers = vec![("content-type".to_string(), "image/gif".to_string())];
        assert_eq!(find_header(&headers, "Content-Type"), Some("image/gif"));
        assert_eq!(find_header(&headers, "etag"), None);
    }

    #[test]
    fn test_reqwest_transport_new() {
        assert!(ReqwestTransport::new(&FetchConfig::default()).is_ok());
    }
}
