//! Per-key deduplication of running lookups.
//!
//! The first request for a key spawns the lookup as its own task and
//! publishes the receiving end of a oneshot channel, wrapped in
//! [`Shared`], so every later caller awaits the same outcome. The entry is
//! removed before the result is sent, whether the lookup succeeded, failed
//! or its task was torn down.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::{Mutex, MutexGuard};

use assetry_core::{CacheKey, Error};

use crate::handle::LocalHandle;

pub(crate) type Outcome = Result<LocalHandle, Error>;
pub(crate) type Channel = Shared<oneshot::Receiver<Outcome>>;

type ChannelMap = Arc<Mutex<HashMap<CacheKey, Channel>>>;

#[derive(Default)]
pub(crate) struct InFlight {
    channels: ChannelMap,
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight").field("pending", &self.channels.lock().len()).finish()
    }
}

impl InFlight {
    pub(crate) fn lock(&self) -> InFlightGuard<'_> {
        InFlightGuard { channels: &self.channels, map: self.channels.lock() }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.channels.lock().contains_key(key)
    }
}

/// Exclusive view of the in-flight map.
pub(crate) struct InFlightGuard<'a> {
    channels: &'a ChannelMap,
    map: MutexGuard<'a, HashMap<CacheKey, Channel>>,
}

impl InFlightGuard<'_> {
    pub(crate) fn get(&self, key: &CacheKey) -> Option<Channel> {
        self.map.get(key).cloned()
    }

    /// Spawn `lookup` and register its channel under `key`.
    pub(crate) fn start<F>(&mut self, key: CacheKey, lookup: F) -> Channel
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let remove = RemoveOnDrop { channels: Arc::clone(self.channels), key: Some(key.clone()) };

        tokio::spawn(async move {
            let outcome = lookup.await;
            drop(remove);
            sender.send(outcome).ok();
        });

        let channel = receiver.shared();
        let evicted = self.map.insert(key, channel.clone());
        debug_assert!(evicted.is_none());
        channel
    }
}

struct RemoveOnDrop {
    channels: ChannelMap,
    key: Option<CacheKey>,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.channels.lock().remove(&key);
        }
    }
}

/// Await a channel; a dropped sender means the lookup task died, which is
/// a failure rather than a cancellation.
pub(crate) async fn settle(key: &CacheKey, channel: Channel) -> Outcome {
    channel.await.unwrap_or_else(|_| {
        tracing::error!(url = %key, "lookup task ended without a result");
        Err(Error::Network(format!("{key}: lookup task failed")))
    })
}
