//! Translation metrics.
//!
//! Counters are owned by the manager instance that records them, so two
//! pipelines in one process never share numbers.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Translation pipeline counters.
#[derive(Debug, Default)]
pub struct TranslationMetrics {
    /// Lookups answered from the in-memory cache
    cache_hits: AtomicUsize,

    /// Lookups that had to go to the store or the queue
    cache_misses: AtomicUsize,

    /// Translation requests dispatched to the AI service
    api_calls: AtomicUsize,

    /// Dispatched requests that failed
    api_failures: AtomicUsize,

    /// Translations written to the durable store
    translations_persisted: AtomicUsize,

    /// Requests abandoned after exhausting retries or failing permanently
    requests_dropped: AtomicUsize,
}

impl TranslationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_failure(&self) {
        self.api_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self) {
        self.translations_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> usize {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn api_failures(&self) -> usize {
        self.api_failures.load(Ordering::Relaxed)
    }

    pub fn translations_persisted(&self) -> usize {
        self.translations_persisted.load(Ordering::Relaxed)
    }

    pub fn requests_dropped(&self) -> usize {
        self.requests_dropped.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let hits = self.cache_hits();
        let misses = self.cache_misses();
        let total_cache_queries = hits + misses;
        let cache_hit_rate = if total_cache_queries > 0 {
            (hits as f64 / total_cache_queries as f64) * 100.0
        } else {
            0.0
        };

        let calls = self.api_calls();
        let failures = self.api_failures();
        let api_success_rate = if calls > 0 {
            (calls.saturating_sub(failures) as f64 / calls as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            api_calls: calls,
            api_failures: failures,
            api_success_rate,
            translations_persisted: self.translations_persisted(),
            requests_dropped: self.requests_dropped(),
        }
    }
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub cache_hits: usize,
    pub cache_misses: usize,

    /// Cache hit rate as a percentage (0-100)
    pub cache_hit_rate: f64,

    pub api_calls: usize,
    pub api_failures: usize,

    /// API success rate as a percentage (0-100)
    pub api_success_rate: f64,

    pub translations_persisted: usize,
    pub requests_dropped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Counter Tests ====================

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = TranslationMetrics::new();
        assert_eq!(metrics.cache_hits(), 0);
        assert_eq!(metrics.api_calls(), 0);
        assert_eq!(metrics.requests_dropped(), 0);
    }

    #[test]
    fn test_record_increments() {
        let metrics = TranslationMetrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_api_call();
        metrics.record_api_failure();
        metrics.record_persisted();
        metrics.record_dropped();

        assert_eq!(metrics.cache_hits(), 2);
        assert_eq!(metrics.cache_misses(), 1);
        assert_eq!(metrics.api_calls(), 1);
        assert_eq!(metrics.api_failures(), 1);
        assert_eq!(metrics.translations_persisted(), 1);
        assert_eq!(metrics.requests_dropped(), 1);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = TranslationMetrics::new();
        let b = TranslationMetrics::new();
        a.record_api_call();
        assert_eq!(a.api_calls(), 1);
        assert_eq!(b.api_calls(), 0);
    }

    // ==================== Report Tests ====================

    #[test]
    fn test_report_rates() {
        let metrics = TranslationMetrics::new();
        for _ in 0..3 {
            metrics.record_cache_hit();
        }
        metrics.record_cache_miss();
        for _ in 0..4 {
            metrics.record_api_call();
        }
        metrics.record_api_failure();

        let report = metrics.report();
        assert!((report.cache_hit_rate - 75.0).abs() < 0.01);
        assert!((report.api_success_rate - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_report_empty_rates_are_zero() {
        let report = TranslationMetrics::new().report();
        assert_eq!(report.cache_hit_rate, 0.0);
        assert_eq!(report.api_success_rate, 0.0);
    }

    #[test]
    fn test_report_serializes() {
        let metrics = TranslationMetrics::new();
        metrics.record_persisted();
        let json = serde_json::to_value(metrics.report()).unwrap();
        assert_eq!(json["translations_persisted"], 1);
        assert!(json.get("cache_hit_rate").is_some());
    }
}
