//! Error recovery and health reporting.
//!
//! Every error raised by the client, store or cache can be handed to
//! [`RecoveryService::handle_error`], which runs the recovery action for its
//! category and tells the caller whether to use a fallback, retry later or
//! give up.

use crate::cache::TranslationCache;
use crate::client::GeminiClient;
use crate::error::{
    AiErrorCode, AppError, CacheErrorCode, ConfigurationErrorCode, FileSystemErrorCode,
};
use crate::locale::LanguageCode;
use crate::store::{FlatTranslations, TranslationStore};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub source_language: LanguageCode,
    /// How long a computed health snapshot is reused
    pub health_cache_ttl: Duration,
    /// Retry delay suggested after network failures
    pub network_retry_delay: Duration,
    /// Lower bound for the retry delay after a rate limit
    pub min_rate_limit_delay: Duration,
    /// Per-minute quota below which the AI service is reported degraded
    pub low_quota_threshold: u32,
    pub cache_memory_warning_bytes: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            source_language: LanguageCode::default_source(),
            health_cache_ttl: Duration::from_secs(5 * 60),
            network_retry_delay: Duration::from_secs(5),
            min_rate_limit_delay: Duration::from_secs(60),
            low_quota_threshold: 10,
            cache_memory_warning_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Where an error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub operation: String,
    pub service: String,
    pub language: Option<String>,
    pub key: Option<String>,
    pub retry_count: u32,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    pub recovered: bool,
    pub fallback_value: Option<String>,
    pub message: String,
    pub should_retry: bool,
    pub retry_delay: Option<Duration>,
}

impl RecoveryResult {
    fn surfaced(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyValidation {
    pub is_valid: bool,
    pub is_configured: bool,
    pub message: String,
    pub suggested_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecovery {
    pub is_online: bool,
    pub can_retry: bool,
    pub estimated_recovery: Option<Duration>,
}

// ==================== Health Types ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Degraded => "degraded",
            HealthLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub status: HealthLevel,
    pub last_check: DateTime<Utc>,
    pub message: Option<String>,
}

impl ServiceHealth {
    fn new(status: HealthLevel, message: impl Into<String>) -> Self {
        Self {
            status,
            last_check: Utc::now(),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicesHealth {
    pub ai: ServiceHealth,
    pub file_system: ServiceHealth,
    pub cache: ServiceHealth,
    pub network: ServiceHealth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthIssue {
    pub severity: IssueSeverity,
    pub service: String,
    pub message: String,
    pub suggested_action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemHealth {
    pub overall: HealthLevel,
    pub services: ServicesHealth,
    pub issues: Vec<HealthIssue>,
    pub checked_at: DateTime<Utc>,
}

pub type ErrorCallback = Arc<dyn Fn(&AppError, &ErrorContext, &RecoveryResult) + Send + Sync>;

// ==================== Service ====================

pub struct RecoveryService {
    config: RecoveryConfig,
    client: Arc<GeminiClient>,
    store: Arc<TranslationStore>,
    cache: Arc<TranslationCache>,
    callbacks: RwLock<Vec<ErrorCallback>>,
    health: tokio::sync::Mutex<Option<(Instant, SystemHealth)>>,
}

impl RecoveryService {
    pub fn new(
        config: RecoveryConfig,
        client: Arc<GeminiClient>,
        store: Arc<TranslationStore>,
        cache: Arc<TranslationCache>,
    ) -> Self {
        Self {
            config,
            client,
            store,
            cache,
            callbacks: RwLock::new(Vec::new()),
            health: tokio::sync::Mutex::new(None),
        }
    }

    /// Register a callback run after every handled error.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&AppError, &ErrorContext, &RecoveryResult) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Classify an error and run the recovery action for its category.
    pub async fn handle_error(&self, err: &AppError, context: &ErrorContext) -> RecoveryResult {
        error!(
            operation = %context.operation,
            service = %context.service,
            language = ?context.language,
            key = ?context.key,
            retry_count = context.retry_count,
            "{}",
            err
        );

        let result = match err {
            AppError::AiService(detail) => self.handle_ai_error(detail.code, err, context).await,
            AppError::FileSystem(detail) => self.handle_fs_error(detail.code, err, context).await,
            AppError::Cache(detail) => self.handle_cache_error(detail.code, err).await,
            AppError::Validation(_) => {
                RecoveryResult::surfaced(format!("Validation error: {}", err.message()))
            }
            AppError::Configuration(detail) => match detail.code {
                ConfigurationErrorCode::MissingApiKey => RecoveryResult::surfaced(
                    "API key not configured - please set up your Gemini API key",
                ),
                _ => RecoveryResult::surfaced(format!("Configuration error: {}", err.message())),
            },
        };

        debug!(
            recovered = result.recovered,
            should_retry = result.should_retry,
            "{}",
            result.message
        );

        let callbacks: Vec<ErrorCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            callback(err, context, &result);
        }

        result
    }

    async fn handle_ai_error(
        &self,
        code: AiErrorCode,
        err: &AppError,
        context: &ErrorContext,
    ) -> RecoveryResult {
        match code {
            AiErrorCode::ApiKeyMissing | AiErrorCode::ApiKeyInvalid => {
                RecoveryResult::surfaced("API key configuration issue detected")
            }
            AiErrorCode::RateLimitExceeded => {
                let status = self.client.get_rate_limit_status();
                let until_reset = status
                    .reset_time
                    .signed_duration_since(Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                RecoveryResult {
                    message: "Rate limit exceeded, will retry after reset".to_string(),
                    should_retry: true,
                    retry_delay: Some(until_reset.max(self.config.min_rate_limit_delay)),
                    ..RecoveryResult::default()
                }
            }
            AiErrorCode::NetworkError | AiErrorCode::Timeout | AiErrorCode::ServiceUnavailable => {
                let fallback = match &context.key {
                    Some(key) => {
                        let language = context
                            .language
                            .as_deref()
                            .unwrap_or(self.config.source_language.as_str());
                        Some(self.create_translation_fallback(key, language).await)
                    }
                    None => None,
                };
                RecoveryResult {
                    recovered: fallback.is_some(),
                    fallback_value: fallback,
                    message: "Network error, using fallback translation".to_string(),
                    should_retry: true,
                    retry_delay: Some(self.config.network_retry_delay),
                }
            }
            _ => RecoveryResult::surfaced(format!("AI service error: {}", err.message())),
        }
    }

    async fn handle_fs_error(
        &self,
        code: FileSystemErrorCode,
        err: &AppError,
        context: &ErrorContext,
    ) -> RecoveryResult {
        match (code, context.language.as_deref()) {
            (FileSystemErrorCode::CorruptionDetected, Some(language)) => {
                let recovered = self.recover_from_file_corruption(language).await;
                RecoveryResult {
                    recovered,
                    message: if recovered {
                        format!("Recovered corrupted translation file for {}", language)
                    } else {
                        format!("Could not recover translation file for {}", language)
                    },
                    should_retry: recovered,
                    ..RecoveryResult::default()
                }
            }
            (FileSystemErrorCode::PermissionDenied, _) => {
                RecoveryResult::surfaced("File permission denied - check file system permissions")
            }
            (FileSystemErrorCode::DiskFull, _) => {
                RecoveryResult::surfaced("Disk full - free up space and try again")
            }
            (FileSystemErrorCode::FileNotFound, Some(language))
                if language != self.config.source_language.as_str() =>
            {
                match self
                    .store
                    .copy_structure(self.config.source_language.as_str(), language)
                    .await
                {
                    Ok(_) => RecoveryResult {
                        recovered: true,
                        message: "Missing translation file recreated from source".to_string(),
                        should_retry: true,
                        ..RecoveryResult::default()
                    },
                    Err(e) => RecoveryResult::surfaced(format!(
                        "Could not recreate translation file for {}: {}",
                        language, e
                    )),
                }
            }
            _ => RecoveryResult::surfaced(format!("File system error: {}", err.message())),
        }
    }

    async fn handle_cache_error(&self, code: CacheErrorCode, err: &AppError) -> RecoveryResult {
        match code {
            CacheErrorCode::CorruptionDetected | CacheErrorCode::MemoryLimitExceeded => {
                let recovered = self.recover_from_cache_corruption().await;
                RecoveryResult {
                    recovered,
                    message: if recovered {
                        "Cache cleared and reloaded from translation files".to_string()
                    } else {
                        "Cache cleared but no translations could be reloaded".to_string()
                    },
                    should_retry: recovered,
                    ..RecoveryResult::default()
                }
            }
            _ => RecoveryResult::surfaced(format!("Cache error: {}", err.message())),
        }
    }

    // ==================== Recovery Actions ====================

    /// Restore a corrupted language file.
    ///
    /// Tries the backup first, then a copy of the source language, then an
    /// empty file.
    pub async fn recover_from_file_corruption(&self, language: &str) -> bool {
        match self.store.restore(language).await {
            Ok(()) => {
                info!("Restored {} from backup", language);
                return true;
            }
            Err(e) => warn!("Backup restore for {} failed: {}", language, e),
        }

        let source = self.config.source_language.as_str();
        if language != source {
            match self.store.copy_structure(source, language).await {
                Ok(count) => {
                    info!("Recreated {} from {} ({} keys)", language, source, count);
                    return true;
                }
                Err(e) => warn!("Recreating {} from {} failed: {}", language, source, e),
            }
        }

        match self.store.write(language, &FlatTranslations::new()).await {
            Ok(()) => {
                warn!("Replaced corrupted {} file with an empty one", language);
                true
            }
            Err(e) => {
                error!("All recovery attempts for {} failed: {}", language, e);
                false
            }
        }
    }

    /// Clear the cache and reload every stored language.
    ///
    /// # Returns
    /// `true` if at least one language was reloaded.
    pub async fn recover_from_cache_corruption(&self) -> bool {
        self.cache.clear();

        let languages = match self.store.list_languages().await {
            Ok(languages) => languages,
            Err(e) => {
                error!("Cache recovery could not list languages: {}", e);
                return false;
            }
        };

        let mut reloaded = 0;
        for language in &languages {
            let loaded = match self.store.read(language).await {
                Ok(translations) => self.cache.set_many(language, &translations),
                Err(e) => Err(e),
            };
            match loaded {
                Ok(()) => reloaded += 1,
                Err(e) => warn!("Failed to reload {} into cache: {}", language, e),
            }
        }

        info!("Cache recovery reloaded {}/{} languages", reloaded, languages.len());
        reloaded > 0
    }

    /// Best available text for a key.
    ///
    /// Order: cached value for the language, cached source text, any other
    /// cached language, the stored source text, the key itself.
    pub async fn create_translation_fallback(&self, key: &str, language: &str) -> String {
        if let Some(value) = self.cache.get(key, language) {
            return value;
        }

        let source = self.config.source_language.as_str();
        if let Some(value) = self.cache.get(key, source) {
            return value;
        }

        for other in self.cache.languages() {
            if other == language || other == source {
                continue;
            }
            if let Some(value) = self.cache.get(key, &other) {
                return value;
            }
        }

        if let Ok(translations) = self.store.read(source).await {
            if let Some(value) = translations.get(key) {
                return value.clone();
            }
        }

        key.to_string()
    }

    // ==================== Diagnostics ====================

    /// Probe the configured API key with a tiny live request.
    pub async fn validate_api_key_configuration(&self) -> ApiKeyValidation {
        if !self.client.has_api_key() {
            return ApiKeyValidation {
                is_valid: false,
                is_configured: false,
                message: "Gemini API key is not configured".to_string(),
                suggested_action: Some(
                    "Please configure your Gemini API key in the GEMINI_API_KEY environment variable"
                        .to_string(),
                ),
            };
        }

        let probe_language = if self.config.source_language.as_str() == "es" {
            "fr"
        } else {
            "es"
        };

        match self
            .client
            .translate_text("test", probe_language, Some("API key validation test"))
            .await
        {
            Ok(_) => ApiKeyValidation {
                is_valid: true,
                is_configured: true,
                message: "API key is valid and working".to_string(),
                suggested_action: None,
            },
            Err(e) => match e.ai_code() {
                Some(AiErrorCode::ApiKeyInvalid) => ApiKeyValidation {
                    is_valid: false,
                    is_configured: true,
                    message: "API key is invalid or has insufficient permissions".to_string(),
                    suggested_action: Some(
                        "Please check your API key and ensure it has the correct permissions"
                            .to_string(),
                    ),
                },
                Some(AiErrorCode::QuotaExceeded) => ApiKeyValidation {
                    is_valid: true,
                    is_configured: true,
                    message: "API key is valid but quota is exceeded".to_string(),
                    suggested_action: Some(
                        "Wait for quota reset or upgrade your API plan".to_string(),
                    ),
                },
                _ => ApiKeyValidation {
                    is_valid: false,
                    is_configured: true,
                    message: format!("API key validation failed: {}", e),
                    suggested_action: Some(
                        "Check your internet connection and try again".to_string(),
                    ),
                },
            },
        }
    }

    pub fn handle_network_error(&self, err: &AppError) -> NetworkRecovery {
        let estimated_recovery = match err.ai_code() {
            Some(AiErrorCode::RateLimitExceeded) => self
                .client
                .get_rate_limit_status()
                .reset_time
                .signed_duration_since(Utc::now())
                .to_std()
                .ok(),
            Some(AiErrorCode::NetworkError | AiErrorCode::Timeout | AiErrorCode::ServiceUnavailable) => {
                Some(self.config.network_retry_delay)
            }
            _ => None,
        };

        NetworkRecovery {
            is_online: self.client.is_online(),
            can_retry: err.is_retryable(),
            estimated_recovery,
        }
    }

    /// Health snapshot, recomputed at most once per `health_cache_ttl`.
    pub async fn get_system_health(&self) -> SystemHealth {
        let mut cached = self.health.lock().await;
        if let Some((computed_at, health)) = cached.as_ref() {
            if computed_at.elapsed() < self.config.health_cache_ttl {
                return health.clone();
            }
        }

        let health = self.compute_health().await;
        *cached = Some((Instant::now(), health.clone()));
        health
    }

    /// Recompute health ignoring the cached snapshot.
    pub async fn refresh_system_health(&self) -> SystemHealth {
        let health = self.compute_health().await;
        *self.health.lock().await = Some((Instant::now(), health.clone()));
        health
    }

    async fn compute_health(&self) -> SystemHealth {
        let services = ServicesHealth {
            ai: self.check_ai_service(),
            file_system: self.check_file_system().await,
            cache: self.check_cache(),
            network: self.check_network(),
        };

        let mut issues = Vec::new();
        for (name, health) in [
            ("ai", &services.ai),
            ("fileSystem", &services.file_system),
            ("cache", &services.cache),
            ("network", &services.network),
        ] {
            let severity = match health.status {
                HealthLevel::Healthy => continue,
                HealthLevel::Degraded => IssueSeverity::Warning,
                HealthLevel::Critical => IssueSeverity::Critical,
            };
            issues.push(HealthIssue {
                severity,
                service: name.to_string(),
                message: health.message.clone().unwrap_or_default(),
                suggested_action: suggested_action(name, health.status).to_string(),
            });
        }

        let overall = [
            services.ai.status,
            services.file_system.status,
            services.cache.status,
            services.network.status,
        ]
        .into_iter()
        .max()
        .unwrap_or(HealthLevel::Healthy);

        SystemHealth {
            overall,
            services,
            issues,
            checked_at: Utc::now(),
        }
    }

    fn check_ai_service(&self) -> ServiceHealth {
        if !self.client.is_online() {
            return ServiceHealth::new(
                HealthLevel::Critical,
                "AI service offline or API key not configured",
            );
        }

        let status = self.client.get_rate_limit_status();
        if status.remaining < self.config.low_quota_threshold {
            ServiceHealth::new(
                HealthLevel::Degraded,
                format!("Low rate limit remaining: {}", status.remaining),
            )
        } else if status.daily_remaining == 0 {
            ServiceHealth::new(HealthLevel::Degraded, "Daily request quota exhausted")
        } else {
            ServiceHealth::new(
                HealthLevel::Healthy,
                format!("{} requests remaining this minute", status.remaining),
            )
        }
    }

    async fn check_file_system(&self) -> ServiceHealth {
        if let Err(e) = self.store.ensure_directory().await {
            return ServiceHealth::new(HealthLevel::Critical, e.to_string());
        }
        match self.store.list_languages().await {
            Ok(languages) if languages.is_empty() => {
                ServiceHealth::new(HealthLevel::Degraded, "No translation files found")
            }
            Ok(languages) => ServiceHealth::new(
                HealthLevel::Healthy,
                format!("{} languages available", languages.len()),
            ),
            Err(e) => ServiceHealth::new(HealthLevel::Critical, e.to_string()),
        }
    }

    fn check_cache(&self) -> ServiceHealth {
        let stats = self.cache.stats();
        if stats.memory_usage > self.config.cache_memory_warning_bytes {
            ServiceHealth::new(
                HealthLevel::Degraded,
                format!("High memory usage: {} bytes", stats.memory_usage),
            )
        } else {
            ServiceHealth::new(
                HealthLevel::Healthy,
                format!(
                    "{} translations cached, {} pending",
                    stats.translation_count, stats.pending_count
                ),
            )
        }
    }

    fn check_network(&self) -> ServiceHealth {
        if self.client.is_network_reachable() {
            ServiceHealth::new(HealthLevel::Healthy, "Network reachable")
        } else {
            ServiceHealth::new(HealthLevel::Critical, "Network offline")
        }
    }

    /// Recompute health every `every`, starting one interval from now, and
    /// log every issue found.
    pub fn spawn_health_monitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let health = service.refresh_system_health().await;
                for issue in &health.issues {
                    match issue.severity {
                        IssueSeverity::Critical => error!(
                            "Health issue in {}: {} ({})",
                            issue.service, issue.message, issue.suggested_action
                        ),
                        IssueSeverity::Warning => warn!(
                            "Health issue in {}: {} ({})",
                            issue.service, issue.message, issue.suggested_action
                        ),
                    }
                }
                debug!("System health: {}", health.overall.as_str());
            }
        })
    }
}

fn suggested_action(service: &str, status: HealthLevel) -> &'static str {
    match (service, status) {
        ("ai", HealthLevel::Critical) => "Check API key configuration and network connection",
        ("ai", _) => "Monitor API usage and consider upgrading plan if needed",
        ("fileSystem", HealthLevel::Critical) => "Check file permissions and disk space",
        ("fileSystem", _) => "Review translation file structure and backup status",
        ("cache", HealthLevel::Critical) => "Clear cache and restart application",
        ("cache", _) => "Monitor memory usage and consider clearing cache",
        ("network", HealthLevel::Critical) => "Check internet connection and firewall settings",
        ("network", _) => "Monitor network stability",
        _ => "Contact support for assistance",
    }
}
