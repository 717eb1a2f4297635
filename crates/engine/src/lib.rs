//! Asset fetch-and-cache engine.
//!
//! Turns remote media URLs into process-local handles:
//! - One [`AssetCache`] per [`MediaCategory`], handed out by [`AssetEngine`]
//! - Concurrent lookups of a key share one fetch
//! - Fetched assets persist with a freshness directive and are served from
//!   the store until stale
//! - Batch submission with per-item callbacks
//! - Subresource Integrity checks for third-party libraries

pub mod asset;
pub mod batch;
pub mod category;
pub mod engine;
pub mod handle;
mod inflight;
pub mod library;

pub use asset::AssetCache;
pub use batch::{BatchItem, BatchSummary};
pub use category::MediaCategory;
pub use engine::AssetEngine;
pub use handle::LocalHandle;
pub use library::{Library, LibraryLoader, verify_integrity};
