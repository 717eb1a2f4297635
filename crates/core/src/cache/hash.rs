//! Row keys for the asset table.

use sha2::{Digest, Sha256};

use crate::key::CacheKey;

/// Hash a cache key into the row key used within one store category.
///
/// Categories are a separate column, so the same URL cached as an image and
/// as a GIF occupies two independent rows.
pub fn row_key(key: &CacheKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
