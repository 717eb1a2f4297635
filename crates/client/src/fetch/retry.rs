//! Bounded retry with exponential backoff.
//!
//! A failed attempt is retried while `attempt < max_attempts`: the loop
//! waits `delay`, doubles it and tries again. With `(3, 1s)` the waits are
//! 1s, 2s and 4s, for four attempts in total. Cancellation ends the loop
//! immediately, including while it is waiting.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use assetry_core::{AppConfig, Error};

/// Caller-facing retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_delay: Duration::from_millis(1000) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self { max_attempts, initial_delay }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.retry_max_attempts, config.retry_initial_delay())
    }
}

/// Progress of one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { attempt: 0, delay: policy.initial_delay, max_attempts: policy.max_attempts }
    }

    /// State for the next attempt, or `None` once the budget is spent.
    pub fn advance(self) -> Option<Self> {
        (self.attempt < self.max_attempts).then(|| Self {
            attempt: self.attempt + 1,
            delay: self.delay.saturating_mul(2),
            max_attempts: self.max_attempts,
        })
    }
}

/// Cancellation sources observed by one fetch call: the client-wide token
/// (connectivity loss, navigation) and the caller's own token.
#[derive(Debug, Clone)]
pub(crate) struct Abort {
    client: CancellationToken,
    caller: Option<CancellationToken>,
}

impl Abort {
    pub(crate) fn new(client: CancellationToken, caller: Option<CancellationToken>) -> Self {
        Self { client, caller }
    }

    async fn cancelled(&self) {
        match &self.caller {
            Some(caller) => tokio::select! {
                _ = self.client.cancelled() => {}
                _ = caller.cancelled() => {}
            },
            None => self.client.cancelled().await,
        }
    }

    fn error(&self, url: &str) -> Error {
        if self.client.is_cancelled() {
            Error::Cancelled(format!("{url}: in-flight requests aborted"))
        } else {
            Error::Cancelled(format!("{url}: aborted by caller"))
        }
    }

    /// Run `fut` unless cancellation fires first; the future is dropped on
    /// cancellation.
    pub(crate) async fn guard<T>(&self, url: &str, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(self.error(url)),
            result = fut => result,
        }
    }

    pub(crate) async fn sleep(&self, url: &str, delay: Duration) -> Result<(), Error> {
        self.guard(url, async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}

/// Drive `attempt` until it succeeds, is cancelled or exhausts `policy`.
///
/// Without a policy a single attempt runs and its error is returned as-is.
pub(crate) async fn run<T, F, Fut>(
    policy: Option<RetryPolicy>, abort: &Abort, url: &str, mut attempt: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let Some(policy) = policy else {
        return attempt().await;
    };

    let mut state = RetryState::new(policy);
    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => err,
        };

        let Some(next) = state.advance() else {
            return Err(Error::MaxRetriesExceeded { attempts: state.attempt + 1, last: Box::new(err) });
        };

        tracing::warn!(
            url,
            attempt = next.attempt,
            max_attempts = state.max_attempts,
            delay_ms = state.delay.as_millis() as u64,
            error = %err,
            "retrying fetch"
        );
        abort.sleep(url, state.delay).await?;
        state = next;
    }
}
