//! Core types and shared functionality for assetry.
//!
//! This crate provides:
//! - Cache keys and binary resources
//! - Freshness computation for stored responses
//! - Persistent per-category asset stores with SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod freshness;
pub mod key;
pub mod resource;

pub use cache::{CacheDb, CacheStore, StoreRegistry, StoreTarget};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use freshness::{FreshnessDirective, FreshnessPolicy, OriginHeaders, StoredEntry};
pub use key::{CacheKey, UrlError, canonicalize};
pub use resource::BinaryResource;
