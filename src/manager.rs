//! Translation manager.
//!
//! Resolves `(key, language)` lookups and keeps the translation files filling
//! up in the background. A lookup never waits on the AI service: cache, then
//! store, then the source text while a translation is queued, then the key.
//!
//! Queue entries are deduplicated on `key:language`. The pending set in the
//! cache marks entries that are queued or in flight; a finished request whose
//! pending mark was cleared in the meantime is discarded.

use crate::cache::TranslationCache;
use crate::client::GeminiClient;
use crate::error::{AppError, AppResult, CacheErrorCode, FileSystemErrorCode, ValidationErrorCode};
use crate::locale::{
    common_language_name, interpolate, is_reserved_key, parse_key_context,
    validate_language_name, LanguageCode, LanguageConfig, LanguageRegistry, MetricsReport,
    TranslationKey, TranslationMetrics,
};
use crate::recovery::{ErrorContext, RecoveryService};
use crate::store::{FlatTranslations, TranslationStore};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub source_language: LanguageCode,
    /// Requests dispatched together per batch
    pub max_concurrency: usize,
    /// Keys enqueued at once when translating a whole language
    pub chunk_size: usize,
    /// Pause between two batches
    pub batch_delay: Duration,
    /// Attempts per request before it is dropped
    pub max_retries: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            source_language: LanguageCode::default_source(),
            max_concurrency: 5,
            chunk_size: 50,
            batch_delay: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub key: String,
    pub source_text: String,
    pub target_language: String,
    pub context: String,
    pub priority: RequestPriority,
    pub retry_count: u32,
    pub last_attempt: Option<Instant>,
}

impl TranslationRequest {
    fn queue_key(&self) -> String {
        queue_key(&self.key, &self.target_language)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Queued,
    InFlight,
    RetryScheduled,
}

struct QueueEntry {
    request: TranslationRequest,
    state: EntryState,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<String, QueueEntry>,
    /// Queue keys in `Queued` state, oldest first
    order: VecDeque<String>,
}

/// Completion of one key while a whole language is translated.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationProgress {
    pub key: String,
    /// 0.0 ..= 100.0
    pub progress: f64,
}

pub type ResourceListener = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

fn queue_key(key: &str, language: &str) -> String {
    format!("{}:{}", key, language)
}

pub struct TranslationManager {
    config: ManagerConfig,
    client: Arc<GeminiClient>,
    store: Arc<TranslationStore>,
    cache: Arc<TranslationCache>,
    recovery: Arc<RecoveryService>,
    registry: LanguageRegistry,
    metrics: TranslationMetrics,
    queue: Mutex<QueueState>,
    queue_len: watch::Sender<usize>,
    processing: AtomicBool,
    listeners: RwLock<Vec<ResourceListener>>,
    /// Runtime background work is spawned on; the missing-key hook may be
    /// called from threads outside it
    runtime: OnceLock<Handle>,
    /// Set while an over-budget cache is being rebuilt
    cache_recovering: Arc<AtomicBool>,
}

impl TranslationManager {
    pub fn new(
        config: ManagerConfig,
        client: Arc<GeminiClient>,
        store: Arc<TranslationStore>,
        cache: Arc<TranslationCache>,
        recovery: Arc<RecoveryService>,
    ) -> Self {
        let (queue_len, _) = watch::channel(0);
        let runtime = OnceLock::new();
        if let Ok(handle) = Handle::try_current() {
            let _ = runtime.set(handle);
        }
        Self {
            registry: LanguageRegistry::new(config.source_language.clone()),
            config,
            client,
            store,
            cache,
            recovery,
            metrics: TranslationMetrics::new(),
            queue: Mutex::new(QueueState::default()),
            queue_len,
            processing: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            runtime,
            cache_recovering: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn source_language(&self) -> &LanguageCode {
        &self.config.source_language
    }

    pub fn client(&self) -> &Arc<GeminiClient> {
        &self.client
    }

    pub fn store(&self) -> &Arc<TranslationStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn recovery(&self) -> &Arc<RecoveryService> {
        &self.recovery
    }

    /// Register every language found on disk and load the source text.
    ///
    /// # Returns
    /// The number of languages registered.
    pub async fn initialize(&self) -> AppResult<usize> {
        self.runtime.get_or_init(Handle::current);
        self.store.ensure_directory().await?;

        let languages = self.store.list_languages().await?;
        for language in &languages {
            if let Ok(code) = LanguageCode::parse(language) {
                let name = code.display_name().to_string();
                self.registry.register(code, name);
            }
        }

        let source = self.config.source_language.as_str();
        match self.load_translations(source).await {
            Ok(count) => info!("Loaded {} {} translations", count, source),
            Err(e) if e.fs_code() == Some(FileSystemErrorCode::FileNotFound) => {
                warn!("No {} translation file yet", source)
            }
            Err(e) => return Err(e),
        }

        info!("Translation manager ready with {} languages", languages.len());
        Ok(languages.len())
    }

    // ==================== Lookup ====================

    pub async fn get_translation(self: &Arc<Self>, key: &str, language: &str) -> String {
        self.get_translation_with(key, language, &HashMap::new()).await
    }

    /// Resolve a key, interpolating `{{name}}` placeholders from `variables`.
    ///
    /// Always returns a string: the translation, the source text while a
    /// translation is queued, or the key itself.
    pub async fn get_translation_with(
        self: &Arc<Self>,
        key: &str,
        language: &str,
        variables: &HashMap<String, String>,
    ) -> String {
        let key = match TranslationKey::parse(key) {
            Ok(key) => key,
            Err(e) => {
                debug!("Refusing lookup: {}", e);
                return key.to_string();
            }
        };
        let key = key.as_str();
        let source = self.config.source_language.as_str();

        if LanguageCode::is_valid(language) {
            if let Some(value) = self.lookup(key, language).await {
                return interpolate(&value, variables);
            }
        }

        if language == source {
            return key.to_string();
        }

        match self.lookup(key, source).await {
            Some(source_text) => {
                if LanguageCode::is_valid(language) && !is_reserved_key(key) {
                    self.enqueue(
                        key,
                        &source_text,
                        language,
                        RequestPriority::Normal,
                        true,
                    );
                }
                interpolate(&source_text, variables)
            }
            None => key.to_string(),
        }
    }

    /// Cache, then store.
    async fn lookup(&self, key: &str, language: &str) -> Option<String> {
        if let Some(value) = self.cache.get(key, language) {
            self.metrics.record_cache_hit();
            return Some(value);
        }
        self.metrics.record_cache_miss();

        let translations = match self.store.read(language).await {
            Ok(translations) => translations,
            Err(e) if e.fs_code() == Some(FileSystemErrorCode::FileNotFound) => return None,
            Err(e) => {
                let context = ErrorContext::new("get_translation", "store")
                    .with_language(language)
                    .with_key(key);
                let result = self.recovery.handle_error(&e, &context).await;
                if !result.recovered {
                    return None;
                }
                self.store.read(language).await.ok()?
            }
        };

        let value = translations.get(key)?.clone();
        if let Err(e) = self.cache.set(key, language, &value) {
            warn!("Failed to cache {}/{}: {}", language, key, e);
        }
        self.check_cache_memory();
        Some(value)
    }

    /// Set a translation directly, replacing any queued request for it.
    pub async fn set_translation(&self, key: &str, language: &str, value: &str) -> AppResult<()> {
        let key = TranslationKey::parse(key)?;
        let language = LanguageCode::parse(language)?;

        self.cache.remove_pending(key.as_str(), language.as_str());
        self.cache.set(key.as_str(), language.as_str(), value)?;

        let mut entry = FlatTranslations::new();
        entry.insert(key.as_str().to_string(), value.to_string());
        self.store.merge(language.as_str(), &entry).await?;
        self.metrics.record_persisted();
        self.notify_resource_added(language.as_str(), key.as_str(), value);
        self.check_cache_memory();
        Ok(())
    }

    /// Load a whole language file into the cache.
    pub async fn load_translations(&self, language: &str) -> AppResult<usize> {
        let translations = self.store.read(language).await?;
        self.cache.set_many(language, &translations)?;
        self.check_cache_memory();
        Ok(translations.len())
    }

    /// Hand an over-budget cache to recovery, which clears and reloads it.
    ///
    /// One rebuild runs at a time. If the reloaded cache is still over the
    /// limit no further rebuild is attempted.
    fn check_cache_memory(&self) {
        if !self.cache.is_over_memory_limit()
            || self.cache_recovering.swap(true, Ordering::AcqRel)
        {
            return;
        }

        let err = AppError::cache(
            CacheErrorCode::MemoryLimitExceeded,
            format!(
                "{} bytes cached (limit {})",
                self.cache.memory_usage(),
                self.cache.config().memory_limit_bytes
            ),
        );
        let recovery = Arc::clone(&self.recovery);
        let cache = Arc::clone(&self.cache);
        let recovering = Arc::clone(&self.cache_recovering);
        let scheduled = self.spawn(async move {
            let context = ErrorContext::new("cache_translation", "cache");
            recovery.handle_error(&err, &context).await;
            if cache.is_over_memory_limit() {
                error!(
                    "Cache still over its memory limit after reload ({} bytes)",
                    cache.memory_usage()
                );
            } else {
                recovering.store(false, Ordering::Release);
            }
        });
        if !scheduled {
            self.cache_recovering.store(false, Ordering::Release);
        }
    }

    // ==================== Missing-Key Hook ====================

    /// Handle a key the UI could not resolve.
    ///
    /// Source-language text is taken as-is and persisted; other languages
    /// get a background translation of `fallback_text`.
    pub fn handle_missing_key(
        self: &Arc<Self>,
        languages: &[String],
        namespace: &str,
        key: &str,
        fallback_text: &str,
    ) {
        let key = match TranslationKey::parse(key) {
            Ok(key) if !fallback_text.trim().is_empty() => key,
            _ => return,
        };
        let key = key.as_str();
        let source = self.config.source_language.as_str();

        for language in languages {
            if !LanguageCode::is_valid(language)
                || self.cache.is_pending(key, language)
                || self.cache.contains(key, language)
            {
                continue;
            }

            if language == source {
                debug!("Recording source text for {}:{}", namespace, key);
                if let Err(e) = self.cache.set(key, language, fallback_text) {
                    warn!("Failed to cache source text for {}: {}", key, e);
                    continue;
                }
                self.check_cache_memory();
                let manager = Arc::clone(self);
                let (key, language, value) =
                    (key.to_string(), language.clone(), fallback_text.to_string());
                self.spawn(async move { manager.persist(&key, &language, &value).await });
            } else if !is_reserved_key(key) {
                self.enqueue(key, fallback_text, language, RequestPriority::High, true);
            }
        }
    }

    /// The hook in the shape the UI localization library calls it.
    pub fn missing_key_hook(
        self: &Arc<Self>,
    ) -> impl Fn(&[String], &str, &str, &str) + Send + Sync + 'static {
        let manager = Arc::clone(self);
        move |languages, namespace, key, fallback| {
            manager.handle_missing_key(languages, namespace, key, fallback)
        }
    }

    /// Context line describing a key, for UI libraries that ask for one.
    pub fn key_context(&self, key: &str) -> String {
        parse_key_context(key)
    }

    /// Register a listener called with `(language, key, value)` after each
    /// persisted translation.
    pub fn on_resource_added<F>(&self, listener: F)
    where
        F: Fn(&str, &str, &str) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    fn notify_resource_added(&self, language: &str, key: &str, value: &str) {
        let listeners: Vec<ResourceListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(language, key, value);
        }
    }

    // ==================== Requests ====================

    /// Queue a translation of `text` for one language, or every registered
    /// target when `language` is `None`.
    ///
    /// # Returns
    /// The number of requests queued.
    pub fn request_translation(
        self: &Arc<Self>,
        key: &str,
        text: &str,
        language: Option<&str>,
    ) -> AppResult<usize> {
        let key = TranslationKey::parse(key)?;
        if text.trim().is_empty() {
            return Err(AppError::validation(
                ValidationErrorCode::EmptySourceText,
                format!("No source text for {}", key),
            ));
        }
        if key.is_reserved() {
            return Ok(0);
        }

        let targets: Vec<String> = match language {
            Some(language) => vec![LanguageCode::parse(language)?.to_string()],
            None => self.registry.targets().into_iter().map(String::from).collect(),
        };

        let queued = targets
            .iter()
            .filter(|target| target.as_str() != self.config.source_language.as_str())
            .filter(|target| {
                self.enqueue(key.as_str(), text, target, RequestPriority::Normal, true)
            })
            .count();
        Ok(queued)
    }

    pub fn is_translation_pending(&self, key: &str, language: &str) -> bool {
        self.cache.is_pending(key, language)
    }

    pub fn pending_count(&self) -> usize {
        self.cache.pending_count()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.lock().entries.len()
    }

    /// Wait until the queue is empty.
    ///
    /// # Returns
    /// `false` if `timeout` elapsed first.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.queue_len.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|len| *len == 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    fn enqueue(
        self: &Arc<Self>,
        key: &str,
        source_text: &str,
        language: &str,
        priority: RequestPriority,
        skip_if_cached: bool,
    ) -> bool {
        if skip_if_cached && self.cache.contains(key, language) {
            return false;
        }

        {
            let mut queue = self.queue.lock();
            let queue_key = queue_key(key, language);
            if queue.entries.contains_key(&queue_key) {
                return false;
            }
            if !self.cache.set_pending(key, language) {
                return false;
            }

            queue.entries.insert(
                queue_key.clone(),
                QueueEntry {
                    request: TranslationRequest {
                        key: key.to_string(),
                        source_text: source_text.to_string(),
                        target_language: language.to_string(),
                        context: parse_key_context(key),
                        priority,
                        retry_count: 0,
                        last_attempt: None,
                    },
                    state: EntryState::Queued,
                },
            );
            queue.order.push_back(queue_key);
            self.queue_len.send_replace(queue.entries.len());
        }

        debug!("Queued translation of {} for {}", key, language);
        self.kick();
        true
    }

    /// Start the queue worker unless one is running.
    fn kick(self: &Arc<Self>) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let manager = Arc::clone(self);
            if !self.spawn(async move { manager.run_queue().await }) {
                self.processing.store(false, Ordering::Release);
            }
        }
    }

    /// Spawn onto the manager's runtime.
    ///
    /// # Returns
    /// `false` when no runtime is known; the task is not run.
    fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = match self.runtime.get() {
            Some(handle) => handle,
            None => match Handle::try_current() {
                Ok(current) => self.runtime.get_or_init(|| current),
                Err(_) => {
                    warn!("No tokio runtime available, background work deferred");
                    return false;
                }
            },
        };
        handle.spawn(task);
        true
    }

    async fn run_queue(self: Arc<Self>) {
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                self.processing.store(false, Ordering::Release);
                // an enqueue may have lost the race with the store above
                if self.has_queued()
                    && self
                        .processing
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    continue;
                }
                return;
            }

            debug!("Processing batch of {} translations", batch.len());
            join_all(batch.into_iter().map(|request| self.process(request))).await;

            if self.has_queued() && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }
    }

    fn has_queued(&self) -> bool {
        !self.queue.lock().order.is_empty()
    }

    fn take_batch(&self) -> Vec<TranslationRequest> {
        let mut queue = self.queue.lock();
        let QueueState { entries, order } = &mut *queue;

        let mut candidates: Vec<(usize, RequestPriority, String)> = order
            .iter()
            .enumerate()
            .filter_map(|(position, queue_key)| {
                entries
                    .get(queue_key)
                    .filter(|entry| entry.state == EntryState::Queued)
                    .map(|entry| (position, entry.request.priority, queue_key.clone()))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(self.config.max_concurrency.max(1));

        let taken: HashSet<String> = candidates.into_iter().map(|(_, _, k)| k).collect();
        order.retain(|queue_key| !taken.contains(queue_key) && entries.contains_key(queue_key));

        let now = Instant::now();
        let mut batch = Vec::with_capacity(taken.len());
        for queue_key in &taken {
            if let Some(entry) = entries.get_mut(queue_key) {
                entry.state = EntryState::InFlight;
                entry.request.last_attempt = Some(now);
                batch.push(entry.request.clone());
            }
        }
        batch
    }

    async fn process(self: &Arc<Self>, request: TranslationRequest) {
        if !self.cache.is_pending(&request.key, &request.target_language) {
            debug!(
                "Skipping {}: no longer pending",
                request.queue_key()
            );
            self.finish(&request);
            return;
        }

        self.metrics.record_api_call();
        match self
            .client
            .translate_text(
                &request.source_text,
                &request.target_language,
                Some(&request.context),
            )
            .await
        {
            Ok(text) => self.complete(&request, text).await,
            Err(e) => self.fail(request, e).await,
        }
    }

    async fn complete(&self, request: &TranslationRequest, text: String) {
        let (key, language) = (request.key.as_str(), request.target_language.as_str());

        if !self.cache.is_pending(key, language) {
            debug!("Discarding result for {}: pending mark cleared", request.queue_key());
            self.finish(request);
            return;
        }

        if let Err(e) = self.cache.set(key, language, &text) {
            warn!("Failed to cache {}/{}: {}", language, key, e);
        }
        self.persist(key, language, &text).await;
        self.finish(request);
        self.check_cache_memory();
    }

    /// Merge one value into the language file, retrying once after a
    /// successful recovery.
    async fn persist(&self, key: &str, language: &str, value: &str) {
        let mut entry = FlatTranslations::new();
        entry.insert(key.to_string(), value.to_string());

        let mut result = self.store.merge(language, &entry).await;
        if let Err(e) = &result {
            let context = ErrorContext::new("persist_translation", "store")
                .with_language(language)
                .with_key(key);
            if self.recovery.handle_error(e, &context).await.should_retry {
                result = self.store.merge(language, &entry).await;
            }
        }

        match result {
            Ok(_) => {
                self.metrics.record_persisted();
                debug!("Persisted {}/{}", language, key);
                self.notify_resource_added(language, key, value);
            }
            Err(e) => error!("Failed to persist {}/{}: {}", language, key, e),
        }
    }

    async fn fail(self: &Arc<Self>, mut request: TranslationRequest, err: AppError) {
        self.metrics.record_api_failure();
        request.retry_count += 1;

        let context = ErrorContext::new("translate", "client")
            .with_language(&request.target_language)
            .with_key(&request.key)
            .with_retry_count(request.retry_count);
        let outcome = self.recovery.handle_error(&err, &context).await;

        if !outcome.should_retry || request.retry_count >= self.config.max_retries {
            warn!(
                "Dropping translation of {} after {} attempt(s): {}",
                request.queue_key(),
                request.retry_count,
                err
            );
            self.metrics.record_dropped();
            self.finish(&request);
            return;
        }

        let delay = outcome
            .retry_delay
            .unwrap_or_else(|| err.retry_delay(request.retry_count));
        info!(
            "Retrying {} in {:?} (attempt {}/{})",
            request.queue_key(),
            delay,
            request.retry_count + 1,
            self.config.max_retries
        );
        self.schedule_retry(request, delay);
    }

    fn schedule_retry(self: &Arc<Self>, request: TranslationRequest, delay: Duration) {
        let queue_key = request.queue_key();
        {
            let mut queue = self.queue.lock();
            match queue.entries.get_mut(&queue_key) {
                Some(entry) => {
                    entry.request = request;
                    entry.state = EntryState::RetryScheduled;
                }
                None => return,
            }
        }

        let manager = Arc::clone(self);
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut queue = manager.queue.lock();
                let Some(entry) = queue.entries.get_mut(&queue_key) else {
                    return;
                };
                if entry.state != EntryState::RetryScheduled {
                    return;
                }
                entry.state = EntryState::Queued;
                queue.order.push_back(queue_key);
            }
            manager.kick();
        });
    }

    /// Remove the queue entry and its pending mark.
    fn finish(&self, request: &TranslationRequest) {
        self.cache
            .remove_pending(&request.key, &request.target_language);
        let mut queue = self.queue.lock();
        queue.entries.remove(&request.queue_key());
        self.queue_len.send_replace(queue.entries.len());
    }

    // ==================== Languages ====================

    pub fn available_languages(&self) -> Vec<LanguageConfig> {
        self.registry.list()
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Create a language as a copy of the source and translate every key.
    ///
    /// The registration is rolled back when the copy fails.
    ///
    /// # Returns
    /// The number of keys queued for translation.
    pub async fn add_new_language(self: &Arc<Self>, code: &str, name: &str) -> AppResult<usize> {
        let code = LanguageCode::parse(code)?;
        let name = validate_language_name(name)?;
        if self.registry.is_source(code.as_str()) {
            return Err(AppError::validation(
                ValidationErrorCode::InvalidLanguageCode,
                format!("{} is the source language", code),
            ));
        }

        let newly_registered = self.registry.register(code.clone(), name.clone());
        let source = self.config.source_language.as_str();
        if let Err(e) = self.store.copy_structure(source, code.as_str()).await {
            if newly_registered {
                self.registry.unregister(code.as_str());
            }
            error!("Adding {} failed during copy: {}", code, e);
            return Err(e);
        }
        self.cache.remove_language(code.as_str());
        info!("Added language {} ({})", code, name);

        self.translate_language(code.as_str(), None).await
    }

    /// Translate every source key that is missing in `language` or still
    /// identical to the source text.
    ///
    /// Keys are queued `chunk_size` at a time; each chunk is awaited before
    /// the next one is queued. Progress is reported per finished key.
    ///
    /// # Returns
    /// The number of keys queued.
    pub async fn translate_language(
        self: &Arc<Self>,
        language: &str,
        progress: Option<mpsc::Sender<TranslationProgress>>,
    ) -> AppResult<usize> {
        let language = LanguageCode::parse(language)?;
        let source = self.config.source_language.as_str();
        if language.as_str() == source {
            return Err(AppError::validation(
                ValidationErrorCode::InvalidLanguageCode,
                "Cannot translate the source language into itself",
            ));
        }

        let source_translations = self.store.read(source).await?;
        let existing = match self.store.read(language.as_str()).await {
            Ok(existing) => existing,
            Err(e) if e.fs_code() == Some(FileSystemErrorCode::FileNotFound) => {
                FlatTranslations::new()
            }
            Err(e) => return Err(e),
        };

        let mut keys: Vec<&String> = source_translations
            .iter()
            .filter(|(key, text)| {
                !is_reserved_key(key)
                    && !text.trim().is_empty()
                    && existing.get(*key).map_or(true, |current| current == *text)
            })
            .map(|(key, _)| key)
            .collect();
        keys.sort();

        let total = keys.len();
        let mut done = 0usize;
        info!("Translating {} keys into {}", total, language);

        for chunk in keys.chunks(self.config.chunk_size.max(1)) {
            let chunk_keys: Vec<String> = chunk.iter().map(|k| k.to_string()).collect();
            for key in &chunk_keys {
                self.enqueue(
                    key,
                    &source_translations[key],
                    language.as_str(),
                    RequestPriority::Low,
                    false,
                );
            }

            self.wait_for_keys(&chunk_keys, language.as_str()).await;

            for key in chunk_keys {
                done += 1;
                if let Some(tx) = &progress {
                    let update = TranslationProgress {
                        key,
                        progress: done as f64 / total as f64 * 100.0,
                    };
                    if tx.send(update).await.is_err() {
                        debug!("Progress receiver dropped");
                    }
                }
            }
        }

        Ok(total)
    }

    async fn wait_for_keys(&self, keys: &[String], language: &str) {
        let queue_keys: Vec<String> = keys.iter().map(|k| queue_key(k, language)).collect();
        let mut rx = self.queue_len.subscribe();
        loop {
            rx.borrow_and_update();
            let outstanding = {
                let queue = self.queue.lock();
                queue_keys.iter().any(|k| queue.entries.contains_key(k))
            };
            if !outstanding || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Remove a non-source language from the registry, cache and disk.
    pub async fn remove_language(&self, code: &str) -> AppResult<()> {
        let code = LanguageCode::parse(code)?;
        if self.registry.is_source(code.as_str()) {
            return Err(AppError::validation(
                ValidationErrorCode::InvalidLanguageCode,
                "The source language cannot be removed",
            ));
        }

        self.registry.unregister(code.as_str());
        self.cache.remove_language(code.as_str());
        self.store.remove_language(code.as_str()).await?;
        info!("Removed language {}", code);
        Ok(())
    }

    pub fn language_name(&self, code: &str) -> String {
        self.registry
            .get(code)
            .map(|config| config.name)
            .or_else(|| common_language_name(code).map(String::from))
            .unwrap_or_else(|| code.to_string())
    }

    pub fn metrics(&self) -> MetricsReport {
        self.metrics.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::client::ClientConfig;
    use crate::recovery::RecoveryConfig;
    use crate::retry::RetryConfig;
    use crate::store::StoreConfig;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{body_string_contains, method},
        Mock, MockServer, ResponseTemplate,
    };

    struct Fixture {
        _dir: TempDir,
        manager: Arc<TranslationManager>,
        store: Arc<TranslationStore>,
    }

    // ==================== Helper Functions ====================

    fn gemini_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    async fn mount_translation(server: &MockServer, text: &str) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_response(text)))
            .mount(server)
            .await;
    }

    fn fixture(base_url: &str) -> Fixture {
        fixture_with_cache(base_url, CacheConfig::default())
    }

    fn fixture_with_cache(base_url: &str, cache_config: CacheConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TranslationStore::new(StoreConfig {
            root: dir.path().join("locales"),
            ..StoreConfig::default()
        }));
        let cache = Arc::new(TranslationCache::in_memory(cache_config));
        let client = Arc::new(
            GeminiClient::new(ClientConfig {
                api_key: Some("test-key".to_string()),
                base_url: base_url.to_string(),
                retry: RetryConfig::new(1, Duration::from_millis(1)),
                min_request_interval: Duration::ZERO,
                batch_delay: Duration::ZERO,
                ..ClientConfig::default()
            })
            .unwrap(),
        );
        let recovery = Arc::new(RecoveryService::new(
            RecoveryConfig {
                network_retry_delay: Duration::from_millis(10),
                ..RecoveryConfig::default()
            },
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&cache),
        ));
        let manager = Arc::new(TranslationManager::new(
            ManagerConfig {
                batch_delay: Duration::ZERO,
                chunk_size: 4,
                ..ManagerConfig::default()
            },
            client,
            Arc::clone(&store),
            cache,
            recovery,
        ));
        Fixture {
            _dir: dir,
            manager,
            store,
        }
    }

    fn flat(pairs: &[(&str, &str)]) -> FlatTranslations {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const IDLE: Duration = Duration::from_secs(5);

    // ==================== Lookup ====================

    #[tokio::test]
    async fn test_cache_hit_with_interpolation() {
        let f = fixture("http://127.0.0.1:9");
        f.manager
            .cache()
            .set("greeting", "en", "Hello {{name}}")
            .unwrap();

        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Ana".to_string());
        assert_eq!(
            f.manager.get_translation_with("greeting", "en", &vars).await,
            "Hello Ana"
        );
        assert_eq!(f.manager.metrics().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_store_hit_is_cached() {
        let f = fixture("http://127.0.0.1:9");
        f.store.write("es", &flat(&[("title", "Título")])).await.unwrap();

        assert_eq!(f.manager.get_translation("title", "es").await, "Título");
        assert_eq!(f.manager.cache().get("title", "es").as_deref(), Some("Título"));
    }

    #[tokio::test]
    async fn test_unknown_key_returns_key() {
        let f = fixture("http://127.0.0.1:9");
        assert_eq!(f.manager.get_translation("nope.missing", "en").await, "nope.missing");
        assert_eq!(f.manager.get_translation("nope.missing", "es").await, "nope.missing");
        assert_eq!(f.manager.get_translation("", "es").await, "");
        assert_eq!(f.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_miss_returns_source_and_translates_in_background() {
        let server = MockServer::start().await;
        mount_translation(&server, "¡Bienvenido!").await;
        let f = fixture(&server.uri());
        f.store.write("en", &flat(&[("welcome", "Welcome!")])).await.unwrap();

        assert_eq!(f.manager.get_translation("welcome", "es").await, "Welcome!");
        assert!(f.manager.is_translation_pending("welcome", "es"));

        assert!(f.manager.wait_until_idle(IDLE).await);
        assert_eq!(
            f.store.read("es").await.unwrap().get("welcome").map(String::as_str),
            Some("¡Bienvenido!")
        );
        assert_eq!(f.manager.get_translation("welcome", "es").await, "¡Bienvenido!");
        assert_eq!(f.manager.pending_count(), 0);
        assert_eq!(f.manager.metrics().translations_persisted, 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_translate_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_response("Hola")))
            .expect(1)
            .mount(&server)
            .await;
        let f = fixture(&server.uri());
        f.store.write("en", &flat(&[("hello", "Hello")])).await.unwrap();

        let lookups = (0..8).map(|_| f.manager.get_translation("hello", "es"));
        for text in join_all(lookups).await {
            assert_eq!(text, "Hello");
        }
        assert!(f.manager.pending_count() <= 1);
        assert!(f.manager.wait_until_idle(IDLE).await);
    }

    #[tokio::test]
    async fn test_reserved_keys_not_translated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_response("x")))
            .expect(0)
            .mount(&server)
            .await;
        let f = fixture(&server.uri());
        f.store.write("en", &flat(&[("debug.flag", "Flag")])).await.unwrap();

        assert_eq!(f.manager.get_translation("debug.flag", "es").await, "Flag");
        assert_eq!(f.manager.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_set_translation_persists() {
        let f = fixture("http://127.0.0.1:9");
        f.manager.set_translation("nav.home", "de", "Startseite").await.unwrap();
        f.manager.set_translation("nav.home", "de", "Startseite").await.unwrap();

        assert_eq!(f.manager.cache().len(), 1);
        assert_eq!(
            f.store.read("de").await.unwrap(),
            flat(&[("nav.home", "Startseite")])
        );
        assert!(f.manager.set_translation("bad key!", "de", "x").await.is_err());
    }

    // ==================== Failures ====================

    #[tokio::test]
    async fn test_invalid_key_error_drops_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        let f = fixture(&server.uri());
        f.store.write("en", &flat(&[("hello", "Hello")])).await.unwrap();

        f.manager.get_translation("hello", "es").await;
        assert!(f.manager.wait_until_idle(IDLE).await);

        assert!(!f.manager.is_translation_pending("hello", "es"));
        assert_eq!(f.manager.metrics().requests_dropped, 1);
        assert!(!f.store.exists("es").await);
    }

    #[tokio::test]
    async fn test_transient_failure_is_rescheduled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_translation(&server, "Hola").await;
        let f = fixture(&server.uri());
        f.store.write("en", &flat(&[("hello", "Hello")])).await.unwrap();

        f.manager.get_translation("hello", "es").await;
        assert!(f.manager.wait_until_idle(IDLE).await);

        assert_eq!(f.manager.cache().get("hello", "es").as_deref(), Some("Hola"));
        let metrics = f.manager.metrics();
        assert_eq!(metrics.api_calls, 2);
        assert_eq!(metrics.api_failures, 1);
        assert_eq!(metrics.requests_dropped, 0);
    }

    #[tokio::test]
    async fn test_dropped_after_retry_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;
        let f = fixture(&server.uri());
        f.store.write("en", &flat(&[("hello", "Hello")])).await.unwrap();

        f.manager.get_translation("hello", "es").await;
        assert!(f.manager.wait_until_idle(IDLE).await);
        assert_eq!(f.manager.metrics().requests_dropped, 1);
        assert_eq!(f.manager.pending_count(), 0);
    }

    // ==================== Missing-Key Hook ====================

    #[tokio::test]
    async fn test_missing_key_for_source_is_persisted() {
        let f = fixture("http://127.0.0.1:9");
        let hook = f.manager.missing_key_hook();
        hook(&["en".to_string()], "translation", "menu.title", "File");

        assert_eq!(f.manager.cache().get("menu.title", "en").as_deref(), Some("File"));
        for _ in 0..50 {
            if f.store.exists("en").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(f.store.read("en").await.unwrap(), flat(&[("menu.title", "File")]));
    }

    #[tokio::test]
    async fn test_missing_key_for_target_is_translated_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Context: Page or section title in the menu section"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_response("Fichier")))
            .expect(1)
            .mount(&server)
            .await;
        let f = fixture(&server.uri());

        let languages = vec!["fr".to_string()];
        f.manager.handle_missing_key(&languages, "translation", "menu.title", "File");
        f.manager.handle_missing_key(&languages, "translation", "menu.title", "File");
        assert!(f.manager.wait_until_idle(IDLE).await);

        assert_eq!(f.manager.cache().get("menu.title", "fr").as_deref(), Some("Fichier"));
        f.manager.handle_missing_key(&languages, "translation", "menu.title", "File");
        assert_eq!(f.manager.queued_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_key_hook_from_ui_thread() {
        let server = MockServer::start().await;
        mount_translation(&server, "Titre").await;
        let f = fixture(&server.uri());
        let hook = f.manager.missing_key_hook();

        std::thread::spawn(move || {
            hook(&["fr".to_string(), "en".to_string()], "translation", "menu.title", "Title");
        })
        .join()
        .unwrap();

        assert!(f.manager.wait_until_idle(IDLE).await);
        assert_eq!(f.manager.cache().get("menu.title", "fr").as_deref(), Some("Titre"));
        assert_eq!(f.manager.cache().get("menu.title", "en").as_deref(), Some("Title"));

        f.manager
            .request_translation("other.key", "Other", Some("de"))
            .unwrap();
        assert!(f.manager.wait_until_idle(IDLE).await);
        assert_eq!(f.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_hook_before_runtime_leaves_queue_startable() {
        let server = MockServer::start().await;
        mount_translation(&server, "Übersetzt").await;
        let uri = server.uri();

        let f = std::thread::spawn(move || {
            let f = fixture(&uri);
            let hook = f.manager.missing_key_hook();
            hook(&["fr".to_string()], "translation", "menu.title", "Title");
            f
        })
        .join()
        .unwrap();
        assert!(f.manager.is_translation_pending("menu.title", "fr"));

        f.manager
            .request_translation("other.key", "Other", Some("de"))
            .unwrap();
        assert!(f.manager.wait_until_idle(IDLE).await);
        assert!(!f.manager.is_translation_pending("menu.title", "fr"));
        assert_eq!(f.manager.cache().get("other.key", "de").as_deref(), Some("Übersetzt"));
    }

    #[tokio::test]
    async fn test_cache_over_memory_limit_is_rebuilt_from_store() {
        let f = fixture_with_cache(
            "http://127.0.0.1:9",
            CacheConfig {
                memory_limit_bytes: 200,
                ..CacheConfig::default()
            },
        );
        f.store.write("en", &flat(&[("hello", "Hello")])).await.unwrap();
        f.manager.cache().set("stale.entry", "fr", "x").unwrap();

        let long = "x".repeat(200);
        f.manager.set_translation("big.value", "de", &long).await.unwrap();

        let cache = f.manager.cache();
        let rebuilt = tokio::time::timeout(IDLE, async {
            while cache.contains("stale.entry", "fr")
                || !cache.contains("hello", "en")
                || !cache.contains("big.value", "de")
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(rebuilt.is_ok(), "cache was not rebuilt");
        assert_eq!(cache.get("big.value", "de").as_deref(), Some(long.as_str()));
    }

    #[tokio::test]
    async fn test_missing_key_uses_trimmed_key() {
        let server = MockServer::start().await;
        mount_translation(&server, "Titre").await;
        let f = fixture(&server.uri());

        f.manager
            .handle_missing_key(&["fr".to_string()], "translation", "  menu.title ", "Title");
        assert!(f.manager.is_translation_pending("menu.title", "fr"));
        assert!(f.manager.wait_until_idle(IDLE).await);

        assert_eq!(f.manager.cache().get("menu.title", "fr").as_deref(), Some("Titre"));
        assert!(f.manager.cache().get("  menu.title ", "fr").is_none());
    }

    #[tokio::test]
    async fn test_resource_listener_notified() {
        let server = MockServer::start().await;
        mount_translation(&server, "Hallo").await;
        let f = fixture(&server.uri());

        let notified = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&notified);
        f.manager.on_resource_added(move |language, key, value| {
            assert_eq!((language, key, value), ("de", "hello", "Hallo"));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        f.manager.request_translation("hello", "Hello", Some("de")).unwrap();
        assert!(f.manager.wait_until_idle(IDLE).await);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_translation_for_all_targets() {
        let server = MockServer::start().await;
        mount_translation(&server, "x").await;
        let f = fixture(&server.uri());
        f.manager
            .registry()
            .register(LanguageCode::parse("es").unwrap(), "Español");
        f.manager
            .registry()
            .register(LanguageCode::parse("fr").unwrap(), "Français");

        assert_eq!(f.manager.request_translation("hello", "Hello", None).unwrap(), 2);
        assert_eq!(f.manager.request_translation("system.x", "X", None).unwrap(), 0);
        assert!(f.manager.request_translation("hello", " ", None).is_err());
        assert!(f.manager.wait_until_idle(IDLE).await);
    }

    // ==================== Languages ====================

    #[tokio::test]
    async fn test_add_new_language_copies_and_translates() {
        let server = MockServer::start().await;
        mount_translation(&server, "traduit").await;
        let f = fixture(&server.uri());
        let source: Vec<(String, String)> = (0..10)
            .map(|i| (format!("section.key{}", i), format!("Text {}", i)))
            .collect();
        let source_map: FlatTranslations = source.into_iter().collect();
        f.store.write("en", &source_map).await.unwrap();

        let queued = f.manager.add_new_language("fr", "Français").await.unwrap();

        assert_eq!(queued, 10);
        assert!(f.manager.registry().contains("fr"));
        let fr = f.store.read("fr").await.unwrap();
        assert_eq!(fr.len(), 10);
        assert!(fr.values().all(|v| v == "traduit"));
        assert_eq!(f.manager.language_name("fr"), "Français");
    }

    #[tokio::test]
    async fn test_add_new_language_rolls_back_on_copy_failure() {
        let f = fixture("http://127.0.0.1:9");

        let err = f.manager.add_new_language("fr", "Français").await.unwrap_err();
        assert_eq!(err.code(), "FS_FILE_NOT_FOUND");
        assert!(!f.manager.registry().contains("fr"));
    }

    #[tokio::test]
    async fn test_add_new_language_validation() {
        let f = fixture("http://127.0.0.1:9");
        assert!(f.manager.add_new_language("french", "Français").await.is_err());
        assert!(f.manager.add_new_language("fr", "  ").await.is_err());
        assert!(f.manager.add_new_language("en", "English").await.is_err());
    }

    #[tokio::test]
    async fn test_translate_language_reports_progress() {
        let server = MockServer::start().await;
        mount_translation(&server, "hecho").await;
        let f = fixture(&server.uri());
        f.store
            .write("en", &flat(&[("a", "A"), ("b", "B"), ("c", "C")]))
            .await
            .unwrap();
        f.store.write("es", &flat(&[("a", "Ya traducido")])).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let total = f.manager.translate_language("es", Some(tx)).await.unwrap();
        assert_eq!(total, 2);

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(updates.len(), 2);
        assert_eq!(updates.last().unwrap().progress, 100.0);
        assert_eq!(
            f.store.read("es").await.unwrap().get("a").map(String::as_str),
            Some("Ya traducido")
        );
    }

    #[tokio::test]
    async fn test_initialize_and_remove_language() {
        let f = fixture("http://127.0.0.1:9");
        f.store.write("en", &flat(&[("a", "A")])).await.unwrap();
        f.store.write("de", &flat(&[("a", "A")])).await.unwrap();

        assert_eq!(f.manager.initialize().await.unwrap(), 2);
        assert!(f.manager.registry().contains("de"));
        assert_eq!(f.manager.cache().get("a", "en").as_deref(), Some("A"));

        f.manager.remove_language("de").await.unwrap();
        assert!(!f.manager.registry().contains("de"));
        assert!(!f.store.exists("de").await);
        assert!(f.manager.remove_language("en").await.is_err());
    }

    #[tokio::test]
    async fn test_key_context_provider() {
        let f = fixture("http://127.0.0.1:9");
        assert_eq!(
            f.manager.key_context("settings.save_button"),
            "Button or action element in the settings section"
        );
    }
}
