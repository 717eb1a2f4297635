//! Per-category asset cache: remote key → process-local handle.
//!
//! A lookup runs through four stages: the persistent store is consulted,
//! a miss goes to the network (`fetch_remote`), the response is stamped
//! with a freshness directive and written back (`persist`), and finally the
//! payload is turned into a [`LocalHandle`] (`materialize`). Concurrent
//! lookups of one key share a single run of the pipeline; a resolved key
//! is answered from memory for the lifetime of the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use assetry_client::fetch::download;
use assetry_client::{FetchClient, FetchRequest, FetchResponse, RangeSupport, RetryPolicy};
use assetry_core::{BinaryResource, CacheKey, CacheStore, Error, FreshnessPolicy, OriginHeaders};

use crate::batch::{BatchItem, BatchSummary};
use crate::handle::{HANDLE_PREFIX, HandleTable, LocalHandle};
use crate::inflight::{self, InFlight, Outcome};

#[derive(Debug)]
struct Inner {
    client: Arc<FetchClient>,
    store: CacheStore,
    retry: Option<RetryPolicy>,
    policy: RwLock<FreshnessPolicy>,
    handles: Mutex<HandleTable>,
    in_flight: InFlight,
}

/// Cache of one asset category.
///
/// Cloning is cheap; clones share handles and in-flight lookups.
#[derive(Debug, Clone)]
pub struct AssetCache {
    inner: Arc<Inner>,
}

impl AssetCache {
    pub fn new(client: Arc<FetchClient>, store: CacheStore, retry: Option<RetryPolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                retry,
                policy: RwLock::new(FreshnessPolicy::default()),
                handles: Mutex::new(HandleTable::default()),
                in_flight: InFlight::default(),
            }),
        }
    }

    /// Store name of this cache's category.
    pub fn category(&self) -> &str {
        self.inner.store.name()
    }

    pub fn policy(&self) -> FreshnessPolicy {
        *self.inner.policy.read()
    }

    /// TTL stamped on entries whose origin sends no directive, and on every
    /// entry in force-cache mode.
    pub fn set_ttl(&self, ttl: Duration) -> &Self {
        self.inner.policy.write().default_ttl = ttl;
        self
    }

    pub fn set_force_cache(&self, force_cache: bool) -> &Self {
        self.inner.policy.write().force_cache = force_cache;
        self
    }

    /// Ignore origin cache directives and keep every fetched asset for the
    /// default TTL.
    pub fn with_force_cache(self) -> Self {
        self.set_force_cache(true);
        self
    }

    /// The handle already materialized for `key`, without any I/O.
    pub fn handle(&self, key: &str) -> Option<LocalHandle> {
        let key = CacheKey::parse(key).ok()?;
        self.inner.handles.lock().get(&key)
    }

    /// Number of materialized handles.
    pub fn handle_count(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// Resolve `key` to a local handle.
    pub async fn get(&self, key: &str, cancel: Option<CancellationToken>) -> Result<LocalHandle, Error> {
        let key = CacheKey::parse(key)?;
        self.get_key(key, cancel).await
    }

    /// Resolve an already parsed key.
    ///
    /// `cancel` aborts the transfer when this call starts it, which every
    /// caller waiting on the same key then observes. A call that joins a
    /// running lookup only stops waiting.
    pub async fn get_key(&self, key: CacheKey, cancel: Option<CancellationToken>) -> Result<LocalHandle, Error> {
        if let Some(handle) = self.inner.handles.lock().get(&key) {
            tracing::trace!(category = %self.category(), url = %key, "handle hit");
            return Ok(handle);
        }

        let (channel, joined) = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(channel) = in_flight.get(&key) {
                (channel, true)
            } else if let Some(handle) = self.inner.handles.lock().get(&key) {
                // settled between the fast path and taking the lock
                return Ok(handle);
            } else {
                let lookup = resolve(Arc::clone(&self.inner), key.clone(), cancel.clone());
                (in_flight.start(key.clone(), lookup), false)
            }
        };

        match cancel {
            Some(token) if joined => {
                tracing::debug!(category = %self.category(), url = %key, "joined in-flight request");
                tokio::select! {
                    outcome = inflight::settle(&key, channel) => outcome,
                    _ = token.cancelled() => Err(Error::Cancelled(format!("{key}: aborted by caller"))),
                }
            }
            _ => inflight::settle(&key, channel).await,
        }
    }

    /// Resolve every item's key, firing each item's callbacks as soon as its
    /// key settles. Never fails.
    pub async fn run(&self, items: Vec<BatchItem>, cancel: Option<CancellationToken>) -> BatchSummary {
        self.run_with(items, cancel, |_, _| {}).await
    }

    /// Like [`run`](Self::run), also calling `on_each_complete` once per
    /// distinct key.
    pub async fn run_with(
        &self, items: Vec<BatchItem>, cancel: Option<CancellationToken>,
        mut on_each_complete: impl FnMut(&str, &Result<LocalHandle, Error>),
    ) -> BatchSummary {
        let mut summary = BatchSummary { items: items.len(), ..Default::default() };

        let mut keys: Vec<String> = Vec::new();
        let mut waiting: Vec<Option<Vec<BatchItem>>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for item in items {
            let group = CacheKey::parse(&item.key).map(|k| k.to_string()).unwrap_or_else(|_| item.key.clone());
            match index.get(&group) {
                Some(&i) => waiting[i].get_or_insert_with(Vec::new).push(item),
                None => {
                    index.insert(group.clone(), keys.len());
                    keys.push(group);
                    waiting.push(Some(vec![item]));
                }
            }
        }
        summary.keys = keys.len();
        if keys.is_empty() {
            return summary;
        }

        self.inner.store.open().await;

        let mut pending: FuturesUnordered<_> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let cancel = cancel.clone();
                async move { (i, self.get(key, cancel).await) }
            })
            .collect();

        while let Some((i, outcome)) = pending.next().await {
            summary.record(&outcome);
            for item in waiting[i].take().unwrap_or_default() {
                item.complete(&outcome);
            }
            on_each_complete(&keys[i], &outcome);
        }

        tracing::debug!(
            category = %self.category(),
            keys = summary.keys,
            items = summary.items,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch settled"
        );
        summary
    }

    /// Save an asset, given by remote key or handle id, to the download
    /// directory.
    ///
    /// Content is resolved through the cache; when that fails the requested
    /// key is downloaded directly.
    pub async fn download(&self, target: &str, filename: &str) -> Result<bool, Error> {
        let key = if target.starts_with(HANDLE_PREFIX) {
            match self.inner.handles.lock().find(target) {
                Some(handle) => handle.key().clone(),
                None => return Err(Error::InvalidInput(format!("unknown handle {target}"))),
            }
        } else {
            CacheKey::parse(target)?
        };

        match self.get_key(key.clone(), None).await {
            Ok(handle) => {
                let dir = &self.inner.client.config().download_dir;
                download::save(dir, filename, handle.resource().bytes()).await?;
                Ok(true)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(
                    category = %self.category(), url = %key, error = %e,
                    "cache miss on download; fetching directly"
                );
                self.inner.client.download(FetchRequest::get(key.as_str()), filename).await
            }
        }
    }

    /// Whether the origin of `key` serves partial content.
    pub async fn probe(&self, key: &str) -> Result<RangeSupport, Error> {
        let key = CacheKey::parse(key)?;
        self.inner.client.probe_range(key.as_str()).await
    }

    /// Drop the handle and stored entry of `key`; returns whether anything
    /// was removed.
    pub async fn invalidate(&self, key: &str) -> Result<bool, Error> {
        let key = CacheKey::parse(key)?;
        let dropped = self.inner.handles.lock().remove(&key).is_some();
        let deleted = self.inner.store.delete(&key).await?;
        tracing::debug!(category = %self.category(), url = %key, dropped, deleted, "invalidated");
        Ok(dropped || deleted)
    }
}

async fn resolve(inner: Arc<Inner>, key: CacheKey, cancel: Option<CancellationToken>) -> Outcome {
    let category = inner.store.name();
    match inner.lookup(&key, cancel).await {
        Ok(payload) => Ok(inner.materialize(key, payload)),
        Err(e) if e.is_cancelled() => {
            tracing::warn!(category, url = %key, error = %e, "asset request cancelled");
            Err(e)
        }
        Err(e) => {
            tracing::warn!(category, url = %key, error = %e, "asset request failed");
            Err(e)
        }
    }
}

impl Inner {
    async fn lookup(&self, key: &CacheKey, cancel: Option<CancellationToken>) -> Result<BinaryResource, Error> {
        let category = self.store.name();
        match self.store.has(key).await {
            Ok(Some(entry)) => {
                tracing::debug!(category, url = %key, bytes = entry.payload.len(), "store hit");
                return Ok(entry.payload);
            }
            Ok(None) => tracing::debug!(category, url = %key, "store miss"),
            Err(e) => tracing::warn!(category, url = %key, error = %e, "store lookup failed; fetching"),
        }

        let response = self.fetch_remote(key, cancel).await?;
        let origin = response.origin_headers();
        let payload = response.into_resource();
        self.persist(key, &payload, &origin).await;
        Ok(payload)
    }

    async fn fetch_remote(&self, key: &CacheKey, cancel: Option<CancellationToken>) -> Result<FetchResponse, Error> {
        let mut request = FetchRequest::get(key.as_str());
        if let Some(policy) = self.retry {
            request = request.with_retry_policy(policy);
        }
        if let Some(token) = cancel {
            request = request.with_cancel(token);
        }
        self.client.fetch(request).await
    }

    async fn persist(&self, key: &CacheKey, payload: &BinaryResource, origin: &OriginHeaders) {
        let policy = *self.policy.read();
        let now = Utc::now();
        let directive = policy.directive_for(origin, now);
        if let Err(e) = self.store.persist(key, payload, directive, now).await {
            tracing::warn!(category = self.store.name(), url = %key, error = %e, "failed to persist asset");
        }
    }

    fn materialize(&self, key: CacheKey, payload: BinaryResource) -> LocalHandle {
        self.handles.lock().materialize(key, payload)
    }
}

#[cfg(test)]
mod tests;
