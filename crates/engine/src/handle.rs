//! Process-local handles to materialized assets.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use assetry_core::{BinaryResource, CacheKey};

/// Scheme prefix of every handle id.
pub const HANDLE_PREFIX: &str = "blob:assetry/";

#[derive(Debug)]
struct HandleInner {
    id: String,
    key: CacheKey,
    resource: BinaryResource,
}

/// Opaque reference to a materialized [`BinaryResource`].
///
/// Cloning is cheap. Two handles are equal iff they have the same id.
#[derive(Debug, Clone)]
pub struct LocalHandle {
    inner: Arc<HandleInner>,
}

impl LocalHandle {
    fn new(key: CacheKey, resource: BinaryResource) -> Self {
        let id = format!("{HANDLE_PREFIX}{}", uuid::Uuid::new_v4());
        Self { inner: Arc::new(HandleInner { id, key, resource }) }
    }

    /// The `blob:` style id consumers use as a source reference.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Key of the remote asset this handle was materialized from.
    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn resource(&self) -> &BinaryResource {
        &self.inner.resource
    }
}

impl PartialEq for LocalHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for LocalHandle {}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.id)
    }
}

/// Key → handle map of one asset cache, with a reverse index by id.
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    by_key: HashMap<CacheKey, LocalHandle>,
    by_id: HashMap<String, CacheKey>,
}

impl HandleTable {
    pub(crate) fn get(&self, key: &CacheKey) -> Option<LocalHandle> {
        self.by_key.get(key).cloned()
    }

    pub(crate) fn find(&self, id: &str) -> Option<LocalHandle> {
        self.by_id.get(id).and_then(|key| self.get(key))
    }

    /// Record a handle for `key`; an existing handle wins.
    pub(crate) fn materialize(&mut self, key: CacheKey, resource: BinaryResource) -> LocalHandle {
        if let Some(existing) = self.by_key.get(&key) {
            return existing.clone();
        }
        let handle = LocalHandle::new(key.clone(), resource);
        self.by_id.insert(handle.id().to_string(), key.clone());
        self.by_key.insert(key, handle.clone());
        handle
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<LocalHandle> {
        let handle = self.by_key.remove(key)?;
        self.by_id.remove(handle.id());
        Some(handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }
}
