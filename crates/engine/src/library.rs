//! Third-party scripts and styles, verified against Subresource Integrity.
//!
//! A set of libraries is loaded all-or-nothing: every file is resolved
//! through the `libraries` cache concurrently, and a single failure or
//! digest mismatch fails the whole load. Mismatching files are
//! invalidated so the next attempt refetches them.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::future::try_join_all;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio_util::sync::CancellationToken;

use assetry_core::Error;

use crate::asset::AssetCache;
use crate::handle::LocalHandle;

/// A library file with its optional integrity string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub url: String,
    pub integrity: Option<String>,
}

impl Library {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), integrity: None }
    }

    pub fn with_integrity(mut self, integrity: impl Into<String>) -> Self {
        self.integrity = Some(integrity.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct LibraryLoader {
    cache: AssetCache,
}

impl LibraryLoader {
    pub fn new(cache: AssetCache) -> Self {
        Self { cache }
    }

    /// Resolve and verify every library, in input order.
    pub async fn load(
        &self, libraries: &[Library], cancel: Option<CancellationToken>,
    ) -> Result<Vec<LocalHandle>, Error> {
        let handles = try_join_all(libraries.iter().map(|library| self.load_one(library, cancel.clone()))).await?;
        tracing::debug!(count = handles.len(), "libraries loaded");
        Ok(handles)
    }

    async fn load_one(&self, library: &Library, cancel: Option<CancellationToken>) -> Result<LocalHandle, Error> {
        let handle = self.cache.get(&library.url, cancel).await?;

        if let Some(integrity) = library.integrity.as_deref()
            && !verify_integrity(integrity, handle.resource().bytes())?
        {
            self.cache.invalidate(&library.url).await?;
            tracing::warn!(url = %handle.key(), integrity, "library failed integrity check");
            return Err(Error::IntegrityMismatch { url: handle.key().to_string(), expected: integrity.to_string() });
        }

        Ok(handle)
    }
}

/// Check `bytes` against an SRI string such as `sha384-<base64>`.
///
/// The string may list several space-separated digests; the content
/// matches if any supported one does. Unsupported algorithms are ignored,
/// and a string with no supported digest at all is an error.
pub fn verify_integrity(integrity: &str, bytes: &[u8]) -> Result<bool, Error> {
    let mut supported = false;

    for token in integrity.split_whitespace() {
        let Some((algorithm, expected)) = token.split_once('-') else {
            continue;
        };
        // options after '?' are reserved and ignored
        let expected = expected.split('?').next().unwrap_or_default();

        let actual = match algorithm {
            "sha256" => STANDARD.encode(Sha256::digest(bytes)),
            "sha384" => STANDARD.encode(Sha384::digest(bytes)),
            "sha512" => STANDARD.encode(Sha512::digest(bytes)),
            _ => continue,
        };
        supported = true;
        if actual == expected {
            return Ok(true);
        }
    }

    if supported { Ok(false) } else { Err(Error::InvalidInput(format!("no supported digest in {integrity:?}"))) }
}
