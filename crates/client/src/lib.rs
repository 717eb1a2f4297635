//! Network client for assetry.
//!
//! This crate provides the resilient fetch pipeline (retry, cancellation,
//! envelope decoding, downloads and range probes) used by the asset
//! caches.

pub mod fetch;

pub use reqwest::Method;

pub use fetch::{
    Envelope, FetchClient, FetchConfig, FetchRequest, FetchResponse, RangeSupport, ReqwestTransport, RetryPolicy,
    RetryState, Transport, TransportRequest, TransportResponse,
};
