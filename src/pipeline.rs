//! Component wiring.
//!
//! Every service is constructed once here and handed to its consumers; no
//! component looks another one up globally.

use crate::cache::{FileSnapshotStore, NoopSnapshotStore, SnapshotStore, TranslationCache};
use crate::client::GeminiClient;
use crate::config::Config;
use crate::error::AppResult;
use crate::recovery::ErrorContext;
use crate::manager::TranslationManager;
use crate::operator::Operator;
use crate::recovery::RecoveryService;
use crate::store::TranslationStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Pipeline {
    pub cache: Arc<TranslationCache>,
    pub store: Arc<TranslationStore>,
    pub client: Arc<GeminiClient>,
    pub recovery: Arc<RecoveryService>,
    pub manager: Arc<TranslationManager>,
    pub snapshot_interval: Duration,
    pub health_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn build(config: &Config) -> AppResult<Self> {
        let snapshots: Arc<dyn SnapshotStore> = match &config.cache_snapshot_path {
            Some(path) => Arc::new(FileSnapshotStore::new(path.clone())),
            None => Arc::new(NoopSnapshotStore),
        };

        let cache = Arc::new(TranslationCache::new(config.cache_config(), snapshots));
        let store = Arc::new(TranslationStore::new(config.store_config()));
        let client = Arc::new(GeminiClient::new(config.client_config())?);
        let recovery = Arc::new(RecoveryService::new(
            config.recovery_config(),
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&cache),
        ));
        let manager = Arc::new(TranslationManager::new(
            config.manager_config(),
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&recovery),
        ));

        Ok(Self::from_parts(config, cache, store, client, recovery, manager))
    }

    /// Assemble a pipeline from already wired components.
    pub fn from_parts(
        config: &Config,
        cache: Arc<TranslationCache>,
        store: Arc<TranslationStore>,
        client: Arc<GeminiClient>,
        recovery: Arc<RecoveryService>,
        manager: Arc<TranslationManager>,
    ) -> Self {
        Self {
            cache,
            store,
            client,
            recovery,
            manager,
            snapshot_interval: config.cache_snapshot_interval(),
            health_interval: config.health_check_interval(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Restore the cache snapshot, register the languages on disk and start
    /// the snapshot and health tasks.
    pub async fn start(&self) -> AppResult<usize> {
        match self.cache.load_snapshot().await {
            Ok(0) => {}
            Ok(restored) => info!("Restored {} cached translations", restored),
            Err(e) => {
                let result = self
                    .recovery
                    .handle_error(&e, &ErrorContext::new("load_snapshot", "cache"))
                    .await;
                warn!("Cache snapshot unusable: {}", result.message);
            }
        }
        if self.client.has_api_key() {
            debug!("AI translation enabled");
        } else {
            warn!("GEMINI_API_KEY not set, missing translations will fall back to source text");
        }
        let languages = self.manager.initialize().await?;

        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            tasks.push(self.spawn_snapshot_task(self.snapshot_interval));
            tasks.push(self.recovery.spawn_health_monitor(self.health_interval));
        }
        Ok(languages)
    }

    pub fn operator(&self) -> Operator {
        Operator::new(Arc::clone(&self.manager))
    }

    /// Write the cache snapshot on an interval.
    pub fn spawn_snapshot_task(&self, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match cache.persist_snapshot().await {
                    Ok(true) => debug!("Cache snapshot written"),
                    Ok(false) => {}
                    Err(e) => warn!("Cache snapshot failed: {}", e),
                }
            }
        })
    }

    /// Drain the queue (bounded by `timeout`), stop the background tasks and
    /// flush the cache snapshot.
    pub async fn shutdown(&self, timeout: Duration) {
        if !self.manager.wait_until_idle(timeout).await {
            warn!(
                "Shutting down with {} translations still queued",
                self.manager.queued_count()
            );
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Err(e) = self.cache.persist_snapshot().await {
            warn!("Final cache snapshot failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlatTranslations;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            locales_dir: dir.path().join("locales"),
            cache_snapshot_path: Some(dir.path().join("cache.json")),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_build_and_start_empty() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::build(&config_in(&dir)).unwrap();

        assert_eq!(pipeline.start().await.unwrap(), 0);
        assert!(dir.path().join("locales").is_dir());
        assert_eq!(pipeline.operator().list_languages().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let first = Pipeline::build(&config).unwrap();
        let mut translations = FlatTranslations::new();
        translations.insert("hello".to_string(), "Hello".to_string());
        first.store.write("en", &translations).await.unwrap();
        first.start().await.unwrap();
        first.cache.set("only.cached", "es", "Solo").unwrap();
        first.shutdown(Duration::from_millis(100)).await;

        let second = Pipeline::build(&config).unwrap();
        second.start().await.unwrap();
        assert_eq!(second.cache.get("only.cached", "es").as_deref(), Some("Solo"));
    }

    #[tokio::test]
    async fn test_start_runs_snapshot_task() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::build(&config_in(&dir)).unwrap();
        pipeline.snapshot_interval = Duration::from_millis(30);
        pipeline.start().await.unwrap();
        pipeline.cache.set("greeting", "fr", "Bonjour").unwrap();

        let snapshot = dir.path().join("cache.json");
        let written = tokio::time::timeout(Duration::from_secs(5), async {
            while !snapshot.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(written.is_ok(), "snapshot was never written");
        assert_eq!(pipeline.tasks.lock().len(), 2);

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.tasks.lock().len(), 2);

        pipeline.shutdown(Duration::from_millis(100)).await;
        assert!(pipeline.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_rebuilds_cache_from_store() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let snapshot = dir.path().join("cache.json");
        std::fs::write(&snapshot, b"{ not a snapshot").unwrap();

        let pipeline = Pipeline::build(&config).unwrap();
        let mut translations = FlatTranslations::new();
        translations.insert("hello".to_string(), "Hello".to_string());
        pipeline.store.write("en", &translations).await.unwrap();

        pipeline.start().await.unwrap();

        assert!(!snapshot.exists());
        assert_eq!(pipeline.cache.get("hello", "en").as_deref(), Some("Hello"));
    }
}
