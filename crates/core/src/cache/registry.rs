//! Registry of named asset stores sharing one durable database.
//!
//! The registry is owned by whoever builds the asset caches (normally the
//! engine) and handed to them explicitly; there is no process-global pool.
//! The database itself is opened lazily, at most once per registry, the
//! first time any category needs it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::connection::CacheDb;
use super::store::CacheStore;
use crate::config::AppConfig;

/// Where the durable store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// SQLite file on disk.
    File(PathBuf),
    /// Private in-memory database; durable for the registry's lifetime only.
    InMemory,
    /// The execution context may not persist anything.
    Untrusted,
}

/// Lazily opened database shared by every store of a registry.
#[derive(Debug)]
pub(crate) struct DbSlot {
    target: StoreTarget,
    cell: OnceCell<Option<CacheDb>>,
}

impl DbSlot {
    /// The shared database, or `None` when persistence is unavailable.
    pub(crate) async fn database(&self) -> Option<CacheDb> {
        self.cell
            .get_or_init(|| async {
                let opened = match &self.target {
                    StoreTarget::File(path) => CacheDb::open(path).await,
                    StoreTarget::InMemory => CacheDb::open_in_memory().await,
                    StoreTarget::Untrusted => return None,
                };

                match opened {
                    Ok(db) => Some(db),
                    Err(e) => {
                        tracing::warn!(
                            error = %e, target = ?self.target,
                            "asset store could not be opened; caching disabled"
                        );
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

/// Explicit registry of per-category [`CacheStore`]s.
#[derive(Debug)]
pub struct StoreRegistry {
    slot: Arc<DbSlot>,
    stores: Mutex<HashMap<String, CacheStore>>,
}

impl StoreRegistry {
    pub fn new(target: StoreTarget) -> Arc<Self> {
        Arc::new(Self {
            slot: Arc::new(DbSlot { target, cell: OnceCell::new() }),
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// Build a registry from configuration: `persist = false` marks the
    /// context as untrusted.
    pub fn from_config(config: &AppConfig) -> Arc<Self> {
        let target =
            if config.persist { StoreTarget::File(config.db_path.clone()) } else { StoreTarget::Untrusted };
        Self::new(target)
    }

    /// Whether the context allows persistence at all.
    pub fn is_trusted(&self) -> bool {
        self.slot.target != StoreTarget::Untrusted
    }

    /// The store for `name`, created on first use and shared afterwards.
    pub fn store(&self, name: &str) -> CacheStore {
        self.stores
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| CacheStore::new(name, Arc::clone(&self.slot)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_memoized_per_name() {
        let registry = StoreRegistry::new(StoreTarget::InMemory);
        let a = registry.store("images");
        let b = registry.store("images");
        let c = registry.store("video");
        assert!(a.same_store(&b));
        assert!(!a.same_store(&c));
    }

    #[test]
    fn test_from_config_trust() {
        let trusted = StoreRegistry::from_config(&AppConfig::default());
        assert!(trusted.is_trusted());

        let untrusted = StoreRegistry::from_config(&AppConfig { persist: false, ..Default::default() });
        assert!(!untrusted.is_trusted());
    }

    #[tokio::test]
    async fn test_database_opened_once_and_shared() {
        let registry = StoreRegistry::new(StoreTarget::InMemory);
        let first = registry.slot.database().await.unwrap();
        first
            .upsert_asset(crate::cache::AssetRow {
                category: "images".into(),
                key_hash: "k".into(),
                url: "https://example.com/k".into(),
                content_type: None,
                content_length: 1,
                body: vec![1],
                stored_at: chrono::Utc::now().to_rfc3339(),
                expires_at: None,
                max_age: Some(60),
                headers_json: "[]".into(),
            })
            .await
            .unwrap();

        let second = registry.slot.database().await.unwrap();
        assert!(second.get_asset("images", "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unopenable_file_degrades() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened as a database file
        let registry = StoreRegistry::new(StoreTarget::File(dir.path().to_path_buf()));
        assert!(registry.slot.database().await.is_none());
    }
}
