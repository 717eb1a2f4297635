//! Scripted in-process transport for tests.
//!
//! Responses are queued per URL. Each call pops the next one; the last
//! response for a URL is repeated once its queue is down to one. Unscripted
//! URLs answer `404`. Every call is recorded with its (tokio) timestamp so
//! tests can assert backoff timing under a paused clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::Method;
use tokio::time::Instant;

use assetry_core::Error;

use super::transport::{Transport, TransportRequest, TransportResponse};

/// One scripted answer.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    delay: Option<Duration>,
    chunk_size: Option<usize>,
    error: Option<Error>,
}

impl MockResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200).with_body(body)
    }

    pub fn status(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Bytes::new(), delay: None, chunk_size: None, error: None }
    }

    /// Fail the exchange itself instead of answering.
    pub fn error(error: Error) -> Self {
        Self { error: Some(error), ..Self::status(0) }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Wait before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stream the body in chunks of `size` bytes.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }
}

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub at: Instant,
}

impl RecordedCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        super::transport::find_header(&self.headers, name)
    }
}

#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue `response` for `url` (compared after URL parsing).
    pub fn enqueue(&self, url: &str, response: MockResponse) -> &Self {
        let key = url::Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.routes.lock().entry(key).or_default().push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.url == url).count()
    }

    fn next_response(&self, url: &str) -> MockResponse {
        let mut routes = self.routes.lock();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| MockResponse::status(404)),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| MockResponse::status(404)),
            None => MockResponse::status(404),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        let url = request.url.to_string();
        self.calls.lock().push(RecordedCall {
            method: request.method,
            url: url.clone(),
            headers: request.headers,
            body: request.body,
            at: Instant::now(),
        });

        let response = self.next_response(&url);
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = response.error {
            return Err(error);
        }

        let chunk_size = response.chunk_size.unwrap_or(response.body.len().max(1));
        let chunks: Vec<Result<Bytes, Error>> = response
            .body
            .chunks(chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        Ok(TransportResponse {
            status: response.status,
            headers: response.headers,
            content_length: Some(response.body.len() as u64),
            body: futures_util::stream::iter(chunks).boxed(),
        })
    }
}
