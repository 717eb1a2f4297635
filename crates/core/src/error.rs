//! Unified error types for assetry.
//!
//! Every variant is cheap to clone so a single failure can be fanned out to
//! all callers waiting on the same in-flight request.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by the fetch client, the persistent store and
/// the asset caches.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The URL could not be parsed or normalized.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Transport level failure (DNS, connection reset, truncated body).
    #[error("NETWORK_FAILURE: {0}")]
    Network(String),

    /// A configured timeout elapsed before the attempt completed.
    #[error("FETCH_TIMEOUT: {0}")]
    Timeout(String),

    /// The origin answered with a non-2xx status.
    #[error("HTTP_ERROR: status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The response body exceeded the configured limit.
    #[error("FETCH_TOO_LARGE: {0}")]
    TooLarge(String),

    /// The request was aborted by its cancellation token, connectivity loss
    /// or navigation.
    #[error("CANCELLED: {0}")]
    Cancelled(String),

    /// Retry budget exhausted.
    #[error("MAX_RETRIES_EXCEEDED: gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: Box<Error> },

    /// The execution context cannot persist data.
    #[error("STORAGE_UNAVAILABLE: {0}")]
    StorageUnavailable(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Storage(String),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The JSON API reported an error in its response envelope.
    #[error("API_ERROR: {0}")]
    Api(String),

    /// A response body could not be decoded.
    #[error("DECODE_ERROR: {0}")]
    Decode(String),

    /// Local file system failure.
    #[error("IO_ERROR: {0}")]
    Io(String),

    /// Downloaded content does not match its subresource integrity string.
    #[error("INTEGRITY_MISMATCH: {url} does not match {expected}")]
    IntegrityMismatch { url: String, expected: String },
}

impl Error {
    /// Whether this error (or the cause it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled(_) => true,
            Error::MaxRetriesExceeded { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Storage("connection closed".to_string()),
            _ => Error::Storage("connection failure".to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => Error::from(e),
            tokio_rusqlite::Error::ConnectionClosed => Error::Storage("connection closed".to_string()),
            _ => Error::Storage("connection failure".to_string()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
