//! Per-category persistent asset store.
//!
//! A [`CacheStore`] is the durable half of an asset cache: lookups that
//! evict stale rows lazily, writes that stamp a freshness directive, and a
//! transparent no-op mode when the context cannot persist anything.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use super::connection::CacheDb;
use super::entries::AssetRow;
use super::hash::row_key;
use super::registry::DbSlot;
use crate::Error;
use crate::freshness::{self, FreshnessDirective, FreshnessPolicy, OriginHeaders, StoredEntry};
use crate::key::CacheKey;
use crate::resource::BinaryResource;

/// 9999-12-31T23:59:59Z; later instants do not survive the RFC 3339 column.
const LATEST_STORABLE_SECS: i64 = 253_402_300_799;

#[derive(Debug)]
struct StoreInner {
    name: String,
    slot: Arc<DbSlot>,
    db: OnceCell<Option<CacheDb>>,
}

/// A named, durable key → binary response store.
///
/// Cloning is cheap; clones share the same underlying handle.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub(crate) fn new(name: &str, slot: Arc<DbSlot>) -> Self {
        Self { inner: Arc::new(StoreInner { name: name.to_string(), slot, db: OnceCell::new() }) }
    }

    /// Category name of this store.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether both values refer to the same store instance.
    pub fn same_store(&self, other: &CacheStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    async fn database(&self) -> Option<&CacheDb> {
        self.inner
            .db
            .get_or_init(|| async {
                let db = self.inner.slot.database().await;
                if db.is_none() {
                    tracing::warn!(
                        category = %self.inner.name,
                        "cache is not supported in this context; assets will not persist"
                    );
                }
                db
            })
            .await
            .as_ref()
    }

    /// Open the store.
    ///
    /// Idempotent; returns whether the store is backed by durable storage.
    /// An untrusted context makes this (and every later operation) a no-op.
    pub async fn open(&self) -> bool {
        self.database().await.is_some()
    }

    /// Look up a fresh entry.
    ///
    /// Stale and zero-length entries are deleted and reported as a miss.
    pub async fn has(&self, key: &CacheKey) -> Result<Option<StoredEntry>, Error> {
        let Some(db) = self.database().await else {
            return Ok(None);
        };

        let key_hash = row_key(key);
        let Some(row) = db.get_asset(self.name(), &key_hash).await? else {
            tracing::trace!(category = %self.name(), url = %key, "store miss");
            return Ok(None);
        };

        let entry = decode_row(key, row);
        let now = Utc::now();
        if entry.payload.is_empty() || !freshness::is_fresh(&entry, now) {
            db.delete_asset(self.name(), &key_hash).await?;
            tracing::debug!(category = %self.name(), url = %key, "evicted stale entry");
            return Ok(None);
        }

        tracing::trace!(category = %self.name(), url = %key, bytes = entry.payload.len(), "store hit");
        Ok(Some(entry))
    }

    /// Persist a freshly fetched payload with a directive computed from the
    /// origin's headers and `policy`.
    ///
    /// Returns `None` without error when the context cannot persist.
    pub async fn set(
        &self, key: &CacheKey, payload: &BinaryResource, origin: &OriginHeaders, policy: FreshnessPolicy,
    ) -> Result<Option<StoredEntry>, Error> {
        let now = Utc::now();
        let directive = policy.directive_for(origin, now);
        self.persist(key, payload, directive, now).await
    }

    /// Persist a payload with an explicit directive.
    pub async fn persist(
        &self, key: &CacheKey, payload: &BinaryResource, directive: FreshnessDirective, now: DateTime<Utc>,
    ) -> Result<Option<StoredEntry>, Error> {
        let Some(db) = self.database().await else {
            return Ok(None);
        };

        if payload.is_empty() {
            tracing::debug!(category = %self.name(), url = %key, "not persisting empty payload");
            return Ok(None);
        }

        let directive = storable(directive);
        let headers = freshness::stored_headers(payload, directive, now);
        let (expires_at, max_age) = match directive {
            FreshnessDirective::ExplicitExpiry(at) => (Some(at.to_rfc3339()), None),
            FreshnessDirective::MaxAge(secs) => (None, Some(i64::try_from(secs).unwrap_or(i64::MAX))),
        };

        let row = AssetRow {
            category: self.name().to_string(),
            key_hash: row_key(key),
            url: key.to_string(),
            content_type: payload.content_type().map(str::to_string),
            content_length: payload.len() as i64,
            body: payload.bytes().to_vec(),
            stored_at: now.to_rfc3339(),
            expires_at,
            max_age,
            headers_json: serde_json::to_string(&headers).map_err(|e| Error::Storage(e.to_string()))?,
        };
        db.upsert_asset(row).await?;

        tracing::trace!(category = %self.name(), url = %key, ?directive, "stored entry");
        Ok(Some(StoredEntry { key: key.clone(), payload: payload.clone(), stored_at: now, directive: Some(directive) }))
    }

    /// Delete an entry; returns whether one existed.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool, Error> {
        match self.database().await {
            Some(db) => db.delete_asset(self.name(), &row_key(key)).await,
            None => Ok(false),
        }
    }

    /// Number of stored entries in this category.
    pub async fn entry_count(&self) -> Result<u64, Error> {
        match self.database().await {
            Some(db) => db.count_assets(self.name()).await,
            None => Ok(0),
        }
    }
}

fn storable(directive: FreshnessDirective) -> FreshnessDirective {
    match directive {
        FreshnessDirective::ExplicitExpiry(at) => {
            let latest = DateTime::from_timestamp(LATEST_STORABLE_SECS, 0);
            FreshnessDirective::ExplicitExpiry(latest.map_or(at, |latest| at.min(latest)))
        }
        max_age => max_age,
    }
}

fn decode_row(key: &CacheKey, row: AssetRow) -> StoredEntry {
    let parse = |raw: &str| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc));

    let directive = match (row.expires_at.as_deref().and_then(parse), row.max_age) {
        (Some(at), _) => Some(FreshnessDirective::ExplicitExpiry(at)),
        (None, Some(secs)) => Some(FreshnessDirective::MaxAge(secs.max(0) as u64)),
        (None, None) => None,
    };

    StoredEntry {
        key: key.clone(),
        payload: BinaryResource::new(row.body, row.content_type),
        // an unreadable date makes the entry stale
        stored_at: parse(&row.stored_at).unwrap_or(DateTime::<Utc>::MIN_UTC),
        directive,
    }
}
