use crate::cache::CacheConfig;
use crate::client::ClientConfig;
use crate::error::{AppError, AppResult, ConfigurationErrorCode};
use crate::locale::{LanguageCode, DEFAULT_SOURCE_LANGUAGE};
use crate::manager::ManagerConfig;
use crate::recovery::RecoveryConfig;
use crate::store::StoreConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Gemini
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_url: String,
    pub gemini_timeout_secs: u64,

    // Rate limits
    pub rate_limit_rpm: u32,
    pub rate_limit_rpd: u32,

    // Locales
    pub locales_dir: PathBuf,
    pub source_language: LanguageCode,

    // Cache
    pub cache_max_entries: usize,
    pub cache_ttl_hours: u64,
    pub cache_snapshot_path: Option<PathBuf>,
    pub cache_snapshot_interval_secs: u64,

    // Health
    pub health_check_interval_secs: u64,

    // Queue
    pub max_concurrent_requests: usize,
    pub translation_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            gemini_api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_timeout_secs: 30,
            rate_limit_rpm: 60,
            rate_limit_rpd: 1500,
            locales_dir: PathBuf::from("src/locales"),
            source_language: LanguageCode::default_source(),
            cache_max_entries: 10_000,
            cache_ttl_hours: 24,
            cache_snapshot_path: None,
            cache_snapshot_interval_secs: 60,
            health_check_interval_secs: 300,
            max_concurrent_requests: 5,
            translation_chunk_size: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// Unparsable numbers fall back to their defaults; an invalid source
    /// language is a configuration error.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let source_language = match non_empty("SOURCE_LANGUAGE") {
            Some(code) => LanguageCode::parse(code.trim()).map_err(|_| {
                AppError::config(
                    ConfigurationErrorCode::InvalidLanguageConfig,
                    format!("SOURCE_LANGUAGE '{}' is not a valid language code", code),
                )
            })?,
            None => LanguageCode::default_source(),
        };

        Ok(Self {
            // Gemini - a missing key is reported at use, never here
            gemini_api_key: non_empty("GEMINI_API_KEY").map(|v| v.trim().to_string()),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_api_url: non_empty("GEMINI_API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_api_url),
            gemini_timeout_secs: lookup("GEMINI_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.gemini_timeout_secs),

            rate_limit_rpm: lookup("RATE_LIMIT_RPM")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.rate_limit_rpm),
            rate_limit_rpd: lookup("RATE_LIMIT_RPD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.rate_limit_rpd),

            locales_dir: non_empty("LOCALES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.locales_dir),
            source_language,

            cache_max_entries: lookup("CACHE_MAX_ENTRIES")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.cache_max_entries),
            cache_ttl_hours: lookup("CACHE_TTL_HOURS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_ttl_hours),
            cache_snapshot_path: non_empty("CACHE_SNAPSHOT_PATH").map(PathBuf::from),
            cache_snapshot_interval_secs: lookup("CACHE_SNAPSHOT_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.cache_snapshot_interval_secs),

            health_check_interval_secs: lookup("HEALTH_CHECK_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.health_check_interval_secs),

            max_concurrent_requests: lookup("MAX_CONCURRENT_REQUESTS")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_requests),
            translation_chunk_size: lookup("TRANSLATION_CHUNK_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.translation_chunk_size),
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.gemini_api_key.clone(),
            base_url: self.gemini_api_url.clone(),
            model: self.gemini_model.clone(),
            timeout: Duration::from_secs(self.gemini_timeout_secs),
            requests_per_minute: self.rate_limit_rpm,
            requests_per_day: self.rate_limit_rpd,
            source_language: self.source_language.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache_max_entries,
            ttl: Duration::from_secs(self.cache_ttl_hours.saturating_mul(60 * 60)),
            ..CacheConfig::default()
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.locales_dir.clone(),
            ..StoreConfig::default()
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            source_language: self.source_language.clone(),
            max_concurrency: self.max_concurrent_requests,
            chunk_size: self.translation_chunk_size,
            ..ManagerConfig::default()
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            source_language: self.source_language.clone(),
            ..RecoveryConfig::default()
        }
    }

    pub fn cache_snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.cache_snapshot_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn is_default_source(&self) -> bool {
        self.source_language.as_str() == DEFAULT_SOURCE_LANGUAGE
    }
}
