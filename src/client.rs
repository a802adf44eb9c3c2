//! Gemini translation client.
//!
//! Every request goes through a shared [`RateLimiter`] (per-minute window,
//! calendar-day cap, minimum spacing) and the retry helper. Retryable
//! failures are network errors, timeouts, 5xx and 429; missing or invalid
//! keys and the daily quota fail at once.

use crate::error::{AiErrorCode, AppError, AppResult, ConfigurationErrorCode, ValidationErrorCode};
use crate::locale::{LanguageCode, TranslationValidator};
use crate::retry::{with_retry_if, RetryConfig};
use chrono::{DateTime, Local, NaiveDate, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    /// API root, e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub base_url: String,
    pub model: String,
    /// Per request
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    /// Minimum spacing between two requests regardless of quota
    pub min_request_interval: Duration,
    /// Texts per batch request
    pub max_batch_size: usize,
    pub max_text_length: usize,
    /// Pause between batch chunks and between fan-out groups
    pub batch_delay: Duration,
    /// Languages translated in parallel by the fan-out
    pub fan_out_group_size: usize,
    pub source_language: LanguageCode,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::translation(),
            requests_per_minute: 60,
            requests_per_day: 1500,
            min_request_interval: Duration::from_secs(1),
            max_batch_size: 10,
            max_text_length: 5000,
            batch_delay: Duration::from_secs(1),
            fan_out_group_size: 3,
            source_language: LanguageCode::default_source(),
            temperature: 0.1,
            top_k: 1,
            top_p: 0.8,
            max_output_tokens: 2048,
        }
    }
}

// ==================== Wire Types ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

// ==================== Rate Limiting ====================

/// Remaining quota of the current minute window.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub daily_remaining: u32,
}

/// Request slot accounting.
///
/// `reserve` books a slot and returns how long the caller must wait before
/// sending; the caller sleeps outside the lock, so the next reservation is
/// already spaced after this one.
#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    per_day: u32,
    min_interval: Duration,
    window_start: Instant,
    window_count: u32,
    day: NaiveDate,
    day_count: u32,
    next_slot: Option<Instant>,
}

impl RateLimiter {
    pub fn new(
        per_minute: u32,
        per_day: u32,
        min_interval: Duration,
        now: Instant,
        today: NaiveDate,
    ) -> Self {
        Self {
            per_minute: per_minute.max(1),
            per_day,
            min_interval,
            window_start: now,
            window_count: 0,
            day: today,
            day_count: 0,
            next_slot: None,
        }
    }

    /// Book the next request slot.
    ///
    /// # Returns
    /// * `Ok(wait)` - time to sleep before sending
    /// * `Err(AI_QUOTA_EXCEEDED)` - the daily cap is used up (counter resets at local midnight)
    pub fn reserve(&mut self, now: Instant, today: NaiveDate) -> AppResult<Duration> {
        if today != self.day {
            self.day = today;
            self.day_count = 0;
        }
        if self.day_count >= self.per_day {
            return Err(AppError::ai(
                AiErrorCode::QuotaExceeded,
                format!("Daily limit of {} requests reached", self.per_day),
            ));
        }

        let mut send_at = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };

        if send_at.saturating_duration_since(self.window_start) >= RATE_WINDOW {
            self.window_start = send_at;
            self.window_count = 0;
        }
        if self.window_count >= self.per_minute {
            send_at = self.window_start + RATE_WINDOW;
            self.window_start = send_at;
            self.window_count = 0;
        }

        self.window_count += 1;
        self.day_count += 1;
        self.next_slot = Some(send_at + self.min_interval);

        Ok(send_at.saturating_duration_since(now))
    }

    pub fn remaining(&self, now: Instant) -> u32 {
        if now.saturating_duration_since(self.window_start) >= RATE_WINDOW {
            self.per_minute
        } else {
            self.per_minute.saturating_sub(self.window_count)
        }
    }

    /// Time until the current minute window resets.
    pub fn reset_in(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= RATE_WINDOW && self.window_start <= now {
            Duration::ZERO
        } else {
            (self.window_start + RATE_WINDOW).saturating_duration_since(now)
        }
    }

    pub fn daily_remaining(&self, today: NaiveDate) -> u32 {
        if today != self.day {
            self.per_day
        } else {
            self.per_day.saturating_sub(self.day_count)
        }
    }
}

// ==================== Client ====================

/// One result of the multi-language fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingTranslation {
    pub language: String,
    pub text: String,
}

pub struct GeminiClient {
    config: ClientConfig,
    http: reqwest::Client,
    api_key: RwLock<Option<String>>,
    limiter: Mutex<RateLimiter>,
    network_reachable: AtomicBool,
}

static NUMBERING_REGEX: OnceLock<Regex> = OnceLock::new();

fn numbering_regex() -> &'static Regex {
    NUMBERING_REGEX.get_or_init(|| Regex::new(r"^\d+\.\s*").unwrap())
}

impl GeminiClient {
    pub fn new(config: ClientConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AppError::ai(
                    AiErrorCode::NetworkError,
                    format!("Failed to build HTTP client: {}", e),
                )
            })?;

        let limiter = RateLimiter::new(
            config.requests_per_minute,
            config.requests_per_day,
            config.min_request_interval,
            Instant::now(),
            Local::now().date_naive(),
        );

        Ok(Self {
            api_key: RwLock::new(config.api_key.clone().filter(|k| !k.trim().is_empty())),
            http,
            limiter: Mutex::new(limiter),
            network_reachable: AtomicBool::new(true),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_api_key(&self, key: Option<String>) {
        *self.api_key.write() = key.filter(|k| !k.trim().is_empty());
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.read().is_some()
    }

    pub fn is_network_reachable(&self) -> bool {
        self.network_reachable.load(Ordering::Relaxed)
    }

    /// A key is configured and the last request reached the service.
    pub fn is_online(&self) -> bool {
        self.has_api_key() && self.is_network_reachable()
    }

    pub fn get_rate_limit_status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let limiter = self.limiter.lock();
        let reset_in = chrono::Duration::from_std(limiter.reset_in(now))
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        RateLimitStatus {
            remaining: limiter.remaining(now),
            reset_time: Utc::now() + reset_in,
            daily_remaining: limiter.daily_remaining(Local::now().date_naive()),
        }
    }

    // ==================== Translation ====================

    /// Translate one text.
    pub async fn translate_text(
        &self,
        text: &str,
        target_language: &str,
        context: Option<&str>,
    ) -> AppResult<String> {
        self.validate_input(text, target_language)?;
        if target_language == self.config.source_language.as_str() {
            return Ok(text.to_string());
        }
        self.require_api_key()?;

        let prompt = self.build_prompt(text, target_language, context);
        let response = self
            .make_request(&prompt, &format!("Translation to {}", target_language))
            .await?;

        let translated = response.trim().to_string();
        if translated.is_empty() {
            return Err(AppError::ai(
                AiErrorCode::InvalidResponse,
                "Empty translation received from API",
            ));
        }

        log_validation(text, &translated, target_language);
        Ok(translated)
    }

    /// Translate several texts, one request per chunk of `max_batch_size`.
    ///
    /// Missing output lines fall back to the untranslated text.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        target_language: &str,
        context: Option<&str>,
    ) -> AppResult<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            self.validate_input(text, target_language)?;
        }
        if target_language == self.config.source_language.as_str() {
            return Ok(texts.to_vec());
        }
        self.require_api_key()?;

        let chunk_size = self.config.max_batch_size.max(1);
        let mut results = Vec::with_capacity(texts.len());
        for (i, chunk) in texts.chunks(chunk_size).enumerate() {
            if i > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            let prompt = self.build_batch_prompt(chunk, target_language, context);
            let response = self
                .make_request(
                    &prompt,
                    &format!("Batch translation to {} ({} texts)", target_language, chunk.len()),
                )
                .await?;
            results.extend(parse_batch_response(&response, chunk));
        }
        Ok(results)
    }

    /// Translate one text into many languages, streaming results.
    ///
    /// Languages are processed in groups of `fan_out_group_size`; a group is
    /// awaited as a whole before its results are sent. Failed languages are
    /// logged and skipped. Dropping the receiver stops further requests.
    pub fn translate_to_all_languages(
        self: &Arc<Self>,
        text: &str,
        languages: &[String],
        context: Option<&str>,
    ) -> AppResult<mpsc::Receiver<StreamingTranslation>> {
        let group_size = self.config.fan_out_group_size.max(1);
        let (tx, rx) = mpsc::channel(group_size);

        if languages.is_empty() {
            return Ok(rx);
        }
        for language in languages {
            self.validate_input(text, language)?;
        }
        self.require_api_key()?;

        let client = Arc::clone(self);
        let text = text.to_string();
        let languages = languages.to_vec();
        let context = context.map(String::from);

        tokio::spawn(async move {
            for (i, group) in languages.chunks(group_size).enumerate() {
                if tx.is_closed() {
                    debug!("Fan-out receiver dropped, stopping");
                    return;
                }
                if i > 0 && !client.config.batch_delay.is_zero() {
                    tokio::time::sleep(client.config.batch_delay).await;
                }

                let results = join_all(group.iter().map(|language| {
                    let client = &client;
                    let text = &text;
                    let context = context.as_deref();
                    async move {
                        (
                            language.clone(),
                            client.translate_text(text, language, context).await,
                        )
                    }
                }))
                .await;

                for (language, result) in results {
                    match result {
                        Ok(text) => {
                            if tx.send(StreamingTranslation { language, text }).await.is_err() {
                                debug!("Fan-out receiver dropped, stopping");
                                return;
                            }
                        }
                        Err(e) => warn!("Fan-out translation to {} failed: {}", language, e),
                    }
                }
            }
        });

        Ok(rx)
    }

    // ==================== Internals ====================

    fn validate_input(&self, text: &str, target_language: &str) -> AppResult<()> {
        if text.trim().is_empty() {
            return Err(AppError::validation(
                ValidationErrorCode::EmptySourceText,
                "Text cannot be empty",
            ));
        }
        let length = text.chars().count();
        if length > self.config.max_text_length {
            return Err(AppError::validation(
                ValidationErrorCode::InvalidTranslationFormat,
                format!(
                    "Text too long: {} characters (max: {})",
                    length, self.config.max_text_length
                ),
            ));
        }
        if target_language.trim().is_empty() {
            return Err(AppError::validation(
                ValidationErrorCode::InvalidLanguageCode,
                "Target language cannot be empty",
            ));
        }
        Ok(())
    }

    fn require_api_key(&self) -> AppResult<String> {
        self.api_key.read().clone().ok_or_else(|| {
            AppError::config(
                ConfigurationErrorCode::MissingApiKey,
                "Set GEMINI_API_KEY to enable AI translation",
            )
        })
    }

    fn build_prompt(&self, text: &str, target_language: &str, context: Option<&str>) -> String {
        let mut prompt = format!(
            r#"You are a professional translator. Translate the following text from {} to {} ({}).

Rules:
1. Maintain the original meaning and tone
2. Keep any placeholders like {{{{variable}}}} unchanged
3. Preserve formatting and special characters
4. Return ONLY the translated text, no explanations
5. If the text contains technical terms, keep them accurate"#,
            self.config.source_language,
            language_name(target_language),
            target_language
        );
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!("\n6. Context: {}", context));
        }
        prompt.push_str(&format!("\n\nText to translate: \"{}\"\n\nTranslation:", text));
        prompt
    }

    fn build_batch_prompt(
        &self,
        texts: &[String],
        target_language: &str,
        context: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            r#"You are a professional translator. Translate the following texts from {} to {} ({}).

Rules:
1. Maintain the original meaning and tone for each text
2. Keep any placeholders like {{{{variable}}}} unchanged
3. Preserve formatting and special characters
4. Return translations in the same order, one per line
5. If a text contains technical terms, keep them accurate"#,
            self.config.source_language,
            language_name(target_language),
            target_language
        );
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!("\n6. Context: {}", context));
        }
        prompt.push_str("\n\nTexts to translate:\n");
        for (i, text) in texts.iter().enumerate() {
            prompt.push_str(&format!("{}. \"{}\"\n", i + 1, text));
        }
        prompt.push_str("\nTranslations (one per line, in order):");
        prompt
    }

    async fn make_request(&self, prompt: &str, operation_name: &str) -> AppResult<String> {
        with_retry_if(
            &self.config.retry,
            operation_name,
            || self.send_once(prompt),
            AppError::is_retryable,
        )
        .await
    }

    async fn send_once(&self, prompt: &str) -> AppResult<String> {
        let wait = self
            .limiter
            .lock()
            .reserve(Instant::now(), Local::now().date_naive())?;
        if !wait.is_zero() {
            if wait >= Duration::from_secs(2) {
                info!("Rate limit reached, waiting {:?}", wait);
            }
            tokio::time::sleep(wait).await;
        }

        let api_key = self.require_api_key()?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let url = reqwest::Url::parse_with_params(&endpoint, &[("key", api_key.as_str())])
            .map_err(|e| {
                AppError::ai(
                    AiErrorCode::NetworkError,
                    format!("Invalid API endpoint {}: {}", endpoint, e),
                )
            })?;

        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_k: self.config.top_k,
                top_p: self.config.top_p,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let response = match self.http.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return Err(self.map_send_error(e)),
        };
        self.network_reachable.store(true, Ordering::Relaxed);

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(map_status(status.as_u16(), &body));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            AppError::ai(
                AiErrorCode::InvalidResponse,
                format!("Failed to parse Gemini response: {}", e),
            )
        })?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or_else(|| {
                AppError::ai(
                    AiErrorCode::InvalidResponse,
                    "Response contained no candidate text",
                )
            })
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::ai(AiErrorCode::Timeout, format!("Request timed out: {}", e))
        } else {
            if e.is_connect() {
                self.network_reachable.store(false, Ordering::Relaxed);
            }
            AppError::ai(AiErrorCode::NetworkError, e.to_string())
        }
    }
}

fn language_name(code: &str) -> String {
    crate::locale::common_language_name(code)
        .unwrap_or(code)
        .to_string()
}

fn map_status(status: u16, body: &str) -> AppError {
    let details = format!("HTTP {}: {}", status, truncate(body, 300));
    let code = match status {
        401 | 403 => AiErrorCode::ApiKeyInvalid,
        429 => AiErrorCode::RateLimitExceeded,
        500..=599 => AiErrorCode::ServiceUnavailable,
        _ => AiErrorCode::NetworkError,
    };
    AppError::ai(code, details)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

/// Match output lines to inputs by position, padding with the inputs.
fn parse_batch_response(response: &str, originals: &[String]) -> Vec<String> {
    let lines: Vec<&str> = response
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    if lines.len() != originals.len() {
        warn!(
            "Expected {} translations, got {}",
            originals.len(),
            lines.len()
        );
    }

    originals
        .iter()
        .enumerate()
        .map(|(i, original)| {
            lines
                .get(i)
                .map(|line| numbering_regex().replace(line.trim(), "").trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| original.clone())
        })
        .collect()
}

fn log_validation(source: &str, translated: &str, language: &str) {
    let validation = TranslationValidator::validate(source, translated);
    if validation.has_warnings() {
        warn!(
            "Translation validation warnings for {}: {:?}",
            language, validation.warnings
        );
    }
    if validation.has_errors() {
        warn!(
            "Translation validation errors for {}: {:?}",
            language, validation.errors
        );
    }
}
