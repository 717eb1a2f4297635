//! Entry point owning the client, the store registry and one cache per
//! category.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use assetry_client::fetch::url::resolve;
use assetry_client::{FetchClient, FetchConfig, FetchRequest, FetchResponse, Method, RetryPolicy};
use assetry_core::freshness::parse_http_date;
use assetry_core::{AppConfig, BinaryResource, CacheKey, Error, FreshnessDirective, FreshnessPolicy, StoreRegistry};

use crate::asset::AssetCache;
use crate::category::MediaCategory;
use crate::library::LibraryLoader;

#[derive(Debug)]
pub struct AssetEngine {
    client: Arc<FetchClient>,
    registry: Arc<StoreRegistry>,
    retry: Option<RetryPolicy>,
    policy: FreshnessPolicy,
    caches: Mutex<HashMap<MediaCategory, AssetCache>>,
}

impl AssetEngine {
    /// Build an engine with a reqwest-backed client and the configured
    /// store.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        config.validate().map_err(|e| Error::InvalidInput(e.to_string()))?;
        let client = Arc::new(FetchClient::new(FetchConfig::from_app_config(config)?)?);
        let registry = StoreRegistry::from_config(config);

        tracing::debug!(db_path = %config.db_path.display(), persist = config.persist, "asset engine configured");
        let retry = Some(RetryPolicy::from_config(config));
        Ok(Self::new(client, registry, retry, FreshnessPolicy::new(config.default_ttl())))
    }

    pub fn new(
        client: Arc<FetchClient>, registry: Arc<StoreRegistry>, retry: Option<RetryPolicy>, policy: FreshnessPolicy,
    ) -> Self {
        Self { client, registry, retry, policy, caches: Mutex::new(HashMap::new()) }
    }

    pub fn client(&self) -> &Arc<FetchClient> {
        &self.client
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// The cache for `category`, created on first use and shared afterwards.
    pub fn cache(&self, category: MediaCategory) -> AssetCache {
        self.caches
            .lock()
            .entry(category)
            .or_insert_with(|| {
                let cache = AssetCache::new(
                    Arc::clone(&self.client),
                    self.registry.store(category.store_name()),
                    self.retry,
                );
                cache.set_ttl(self.policy.default_ttl);
                cache.set_force_cache(self.policy.force_cache || category.force_cache_by_default());
                cache
            })
            .clone()
    }

    /// Loader for third-party scripts and styles.
    pub fn libraries(&self) -> LibraryLoader {
        LibraryLoader::new(self.cache(MediaCategory::Libraries))
    }

    /// Cancel every transfer currently running through the engine's client.
    pub fn abort_in_flight(&self) {
        self.client.abort_in_flight();
    }

    /// Execute `request`, serving it from the `request` store when it asks
    /// for caching.
    ///
    /// Stored responses expire at the origin's `Expires`, or `cache_ttl`
    /// after storing when the origin sends none. Only GET can be cached.
    pub async fn fetch_cached(&self, request: FetchRequest) -> Result<FetchResponse, Error> {
        let Some(ttl) = request.cache_ttl() else {
            return self.client.fetch(request).await;
        };
        if *request.method() != Method::GET {
            return Err(Error::InvalidInput(format!("only GET can be cached, got {}", request.method())));
        }

        let url = resolve(self.client.config().base_url.as_ref(), request.target())?;
        let key = CacheKey::parse(url.as_str())?;
        let store = self.registry.store(MediaCategory::Request.store_name());

        match store.has(&key).await {
            Ok(Some(entry)) => {
                tracing::debug!(url = %key, "request cache hit");
                let content_type = entry.payload.content_type().map(str::to_string);
                let headers = content_type.iter().map(|ct| ("content-type".to_string(), ct.clone())).collect();
                return Ok(FetchResponse {
                    url,
                    status: 200,
                    headers,
                    content_type,
                    bytes: entry.payload.bytes().clone(),
                    fetch_ms: 0,
                });
            }
            Ok(None) => tracing::debug!(url = %key, "request cache miss"),
            Err(e) => tracing::warn!(url = %key, error = %e, "request cache lookup failed"),
        }

        let response = self.client.fetch(request).await?;

        let now = Utc::now();
        let expires_at = response
            .header("expires")
            .and_then(parse_http_date)
            .or_else(|| TimeDelta::from_std(ttl).ok().and_then(|ttl| now.checked_add_signed(ttl)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let payload = BinaryResource::new(response.bytes.clone(), response.content_type.clone());
        if let Err(e) = store.persist(&key, &payload, FreshnessDirective::ExplicitExpiry(expires_at), now).await {
            tracing::warn!(url = %key, error = %e, "failed to store request response");
        }

        Ok(response)
    }
}
