//! Engine configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (ASSETRY_*)
//! 2. TOML config file (if ASSETRY_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Engine configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (ASSETRY_*)
/// 2. TOML config file (if ASSETRY_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite asset store.
    ///
    /// Set via ASSETRY_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Whether the execution context may persist assets.
    ///
    /// When false every store operation degrades to a miss and every lookup
    /// is a live fetch. Set via ASSETRY_PERSIST environment variable.
    #[serde(default = "default_true")]
    pub persist: bool,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via ASSETRY_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via ASSETRY_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Per-attempt timeout in milliseconds. Unset means retry exhaustion is
    /// the only bound on a request.
    ///
    /// Set via ASSETRY_TIMEOUT_MS environment variable.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Maximum number of redirects to follow.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Default time-to-live of stored assets in milliseconds.
    ///
    /// Set via ASSETRY_DEFAULT_TTL_MS environment variable.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Retries after the first failed attempt.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Base URL that relative request paths are joined onto.
    ///
    /// Set via ASSETRY_API_BASE_URL environment variable.
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Directory that downloads are saved into.
    ///
    /// Set via ASSETRY_DOWNLOAD_DIR environment variable.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./assetry-cache.sqlite")
}

fn default_user_agent() -> String {
    "assetry/0.1".into()
}

fn default_max_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_max_redirects() -> usize {
    5
}

fn default_ttl_ms() -> u64 {
    1000 * 60 * 60 * 6
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            persist: true,
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: None,
            max_redirects: default_max_redirects(),
            default_ttl_ms: default_ttl_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            api_base_url: None,
            download_dir: default_download_dir(),
        }
    }
}

impl AppConfig {
    /// Per-attempt timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `ASSETRY_`
    /// 2. TOML file from `ASSETRY_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("ASSETRY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("ASSETRY_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parsed API base URL, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the value is not an absolute URL.
    pub fn api_base_url(&self) -> Result<Option<url::Url>, ConfigError> {
        self.api_base_url
            .as_deref()
            .map(|raw| {
                url::Url::parse(raw.trim_end_matches('/'))
                    .map_err(|e| ConfigError::Invalid { field: "api_base_url".into(), reason: e.to_string() })
            })
            .transpose()
    }
}
