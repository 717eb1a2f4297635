//! Batch submission types for [`AssetCache::run`](crate::AssetCache::run).

use std::fmt;

use assetry_core::Error;

use crate::handle::LocalHandle;

type SuccessFn = Box<dyn FnOnce(&LocalHandle) + Send>;
type FailureFn = Box<dyn FnOnce(&Error) + Send>;

/// One consumer request: a key plus its completion callbacks.
pub struct BatchItem {
    pub(crate) key: String,
    pub(crate) on_success: Option<SuccessFn>,
    pub(crate) on_failure: Option<FailureFn>,
}

impl BatchItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), on_success: None, on_failure: None }
    }

    pub fn on_success(mut self, f: impl FnOnce(&LocalHandle) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn complete(self, outcome: &Result<LocalHandle, Error>) {
        match outcome {
            Ok(handle) => {
                if let Some(f) = self.on_success {
                    f(handle);
                }
            }
            Err(err) => {
                if let Some(f) = self.on_failure {
                    f(err);
                }
            }
        }
    }
}

impl fmt::Debug for BatchItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchItem")
            .field("key", &self.key)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Outcome counts of one batch. `succeeded`, `failed` and `cancelled` count
/// distinct keys and always add up to `keys`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub keys: usize,
    pub items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub(crate) fn record(&mut self, outcome: &Result<LocalHandle, Error>) {
        match outcome {
            Ok(_) => self.succeeded += 1,
            Err(err) if err.is_cancelled() => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.succeeded == self.keys
    }
}
