//! SQLite-backed persistent store for binary assets.
//!
//! This module provides the durable half of the asset caches using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - One logical store per asset category, sharing a single database
//! - Freshness directives stamped at write time, checked lazily on read
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Transparent no-op behaviour in contexts that may not persist

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod registry;
pub mod store;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::AssetRow;
pub use registry::{StoreRegistry, StoreTarget};
pub use store::CacheStore;
