//! Operator commands, expressed purely through the manager.

use crate::cache::CacheStats;
use crate::client::RateLimitStatus;
use crate::error::{AppError, AppResult, FileSystemErrorCode, ValidationErrorCode};
use crate::locale::{
    common_language_name, validate_language_name, LanguageCode, LanguageConfig, MetricsReport,
    COMMON_LANGUAGES,
};
use crate::manager::{TranslationManager, TranslationProgress};
use crate::recovery::{ApiKeyValidation, SystemHealth};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageProgress {
    pub language: String,
    /// Keys in the source language
    pub total: usize,
    /// Source keys present in the language and not pending
    pub translated: usize,
    pub pending: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorStats {
    pub cache: CacheStats,
    pub metrics: MetricsReport,
    pub rate_limit: RateLimitStatus,
    pub languages: usize,
    pub queued: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageSuggestion {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// Known name for the code, when the code is in the common table
    pub suggested_name: Option<String>,
    /// Common codes sharing the primary subtag, e.g. `zh-CN` for `zh`
    pub similar_codes: Vec<String>,
}

/// A running `translate_all`.
pub struct TranslationJob {
    pub progress: mpsc::Receiver<TranslationProgress>,
    pub handle: JoinHandle<AppResult<usize>>,
}

pub struct Operator {
    manager: Arc<TranslationManager>,
}

impl Operator {
    pub fn new(manager: Arc<TranslationManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<TranslationManager> {
        &self.manager
    }

    /// Add a language and translate it completely.
    pub async fn add_language(&self, code: &str, name: &str) -> AppResult<usize> {
        self.manager.add_new_language(code, name).await
    }

    /// Start translating every untranslated key from `source` into `target`.
    pub fn translate_all(&self, source: &str, target: &str) -> AppResult<TranslationJob> {
        if source != self.manager.source_language().as_str() {
            return Err(AppError::validation(
                ValidationErrorCode::InvalidLanguageCode,
                format!(
                    "Translations are derived from {}, not {}",
                    self.manager.source_language(),
                    source
                ),
            ));
        }
        let target = LanguageCode::parse(target)?;

        let (tx, rx) = mpsc::channel(64);
        let manager = Arc::clone(&self.manager);
        let handle = tokio::spawn(async move {
            manager.translate_language(target.as_str(), Some(tx)).await
        });

        Ok(TranslationJob {
            progress: rx,
            handle,
        })
    }

    pub async fn get_progress(&self, language: &str) -> AppResult<LanguageProgress> {
        let language = LanguageCode::parse(language)?;
        let store = self.manager.store();

        let source = store.read(self.manager.source_language().as_str()).await?;
        let target = match store.read(language.as_str()).await {
            Ok(target) => target,
            Err(e) if e.fs_code() == Some(FileSystemErrorCode::FileNotFound) => Default::default(),
            Err(e) => return Err(e),
        };
        let pending = self.manager.cache().pending_keys(language.as_str());

        let translated = source
            .keys()
            .filter(|key| target.contains_key(*key) && !pending.contains(*key))
            .count();
        let total = source.len();

        Ok(LanguageProgress {
            language: language.to_string(),
            total,
            translated,
            pending: pending.len(),
            percentage: if total == 0 {
                100.0
            } else {
                translated as f64 / total as f64 * 100.0
            },
        })
    }

    pub fn list_languages(&self) -> Vec<LanguageConfig> {
        self.manager.available_languages()
    }

    pub fn stats(&self) -> OperatorStats {
        OperatorStats {
            cache: self.manager.cache().stats(),
            metrics: self.manager.metrics(),
            rate_limit: self.manager.client().get_rate_limit_status(),
            languages: self.manager.available_languages().len(),
            queued: self.manager.queued_count(),
        }
    }

    pub async fn remove_language(&self, code: &str) -> AppResult<()> {
        self.manager.remove_language(code).await
    }

    pub async fn health(&self) -> SystemHealth {
        self.manager.recovery().refresh_system_health().await
    }

    pub async fn check_key(&self) -> ApiKeyValidation {
        self.manager.recovery().validate_api_key_configuration().await
    }

    /// Check a code/name pair before adding it.
    pub fn validate_and_suggest(&self, code: &str, name: &str) -> LanguageSuggestion {
        let mut errors = Vec::new();

        if let Err(e) = LanguageCode::parse(code) {
            errors.push(e.message().to_string());
        } else if self.manager.registry().contains(code) {
            errors.push(format!("Language {} is already registered", code));
        }
        if let Err(e) = validate_language_name(name) {
            errors.push(e.message().to_string());
        }

        let primary = code
            .split('-')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let similar_codes = COMMON_LANGUAGES
            .iter()
            .map(|(c, _)| *c)
            .filter(|c| *c != code && c.split('-').next() == Some(primary.as_str()))
            .map(String::from)
            .collect();

        LanguageSuggestion {
            is_valid: errors.is_empty(),
            errors,
            suggested_name: common_language_name(code).map(String::from),
            similar_codes,
        }
    }
}

/// `[#####-----] 50.0%`
pub fn render_progress_bar(percentage: f64, width: usize) -> String {
    let percentage = percentage.clamp(0.0, 100.0);
    let filled = ((percentage / 100.0) * width as f64).round() as usize;
    format!(
        "[{}{}] {:.1}%",
        "#".repeat(filled),
        "-".repeat(width.saturating_sub(filled)),
        percentage
    )
}
