//! # Application State Management
//!
//! Shared handles every connection actor, background task and HTTP handler
//! needs. [`AppState`] is cheap to clone: each field is an `Arc` (or `Copy`),
//! so handing a copy to a new connection only bumps reference counts.
//!
//! ## Key Rust Concepts:
//! - **Arc<T>**: shared ownership across actix workers and tokio tasks
//! - **Mutex<T>**: single-writer aggregate for process-wide counters
//! - **Instant**: monotonic clock for uptime
//!
//! ## Statistics:
//! [`StatsCollector`] keeps exact running sums and counts. Averages are derived
//! at snapshot time (`sum / count`) instead of being nudged incrementally, so
//! concurrent completions cannot make the reported average drift.

use crate::audio::AudioConditioner;
use crate::config::AppConfig;
use crate::session::SessionRegistry;
use crate::translation::{RetryPolicy, TranslationEngine, TranslationGateway};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Loaded once at startup; read-only afterwards.
    pub config: Arc<AppConfig>,
    pub registry: Arc<SessionRegistry>,
    pub stats: Arc<StatsCollector>,
    pub conditioner: Arc<AudioConditioner>,
    pub gateway: Arc<TranslationGateway>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the shared components together around a translation engine.
    pub fn new(config: AppConfig, engine: Arc<dyn TranslationEngine>) -> Self {
        let conditioner = Arc::new(AudioConditioner::new(config.audio.clone()));
        let gateway = Arc::new(TranslationGateway::new(
            engine,
            conditioner.clone(),
            RetryPolicy::from_config(&config.engine),
        ));

        Self {
            registry: Arc::new(SessionRegistry::new(config.session.max_concurrent_sessions)),
            stats: Arc::new(StatsCollector::default()),
            conditioner,
            gateway,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Point-in-time view of the process-wide counters.
    pub fn aggregate_stats(&self) -> AggregateStats {
        let totals = self.stats.totals();
        let translations_total = totals.succeeded + totals.failed;

        AggregateStats {
            connections_total: totals.connections_total,
            connections_active: self.registry.len(),
            translations_total,
            translations_succeeded: totals.succeeded,
            translations_failed: totals.failed,
            success_rate_percent: if translations_total > 0 {
                totals.succeeded as f64 * 100.0 / translations_total as f64
            } else {
                0.0
            },
            avg_processing_time_ms: if totals.succeeded > 0 {
                totals.processing_ms_sum / totals.succeeded as f64
            } else {
                0.0
            },
            backpressure_events: self.gateway.backpressure_events(),
            uptime_seconds: self.get_uptime_seconds(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Debug, Default, Clone)]
struct StatsTotals {
    connections_total: u64,
    succeeded: u64,
    failed: u64,
    processing_ms_sum: f64,
}

/// Single-writer aggregate for translation and connection counters.
#[derive(Debug, Default)]
pub struct StatsCollector {
    totals: Mutex<StatsTotals>,
}

impl StatsCollector {
    pub fn record_connection(&self) {
        self.lock().connections_total += 1;
    }

    pub fn record_success(&self, processing_time_ms: f64) {
        let mut totals = self.lock();
        totals.succeeded += 1;
        totals.processing_ms_sum += processing_time_ms.max(0.0);
    }

    pub fn record_failure(&self) {
        self.lock().failed += 1;
    }

    fn totals(&self) -> StatsTotals {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StatsTotals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide statistics as reported by `/stats` and the periodic log line.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateStats {
    pub connections_total: u64,
    pub connections_active: usize,
    pub translations_total: u64,
    pub translations_succeeded: u64,
    pub translations_failed: u64,
    pub success_rate_percent: f64,
    pub avg_processing_time_ms: f64,
    pub backpressure_events: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::gateway::tests::{Scripted, ScriptedEngine};

    #[test]
    fn test_average_is_exact_sum_over_count() {
        let engine = Arc::new(ScriptedEngine::always(Scripted::Hang));
        let state = AppState::new(AppConfig::default(), engine);

        state.stats.record_success(10.0);
        state.stats.record_success(20.0);
        state.stats.record_success(30.0);
        state.stats.record_failure();
        state.stats.record_connection();

        let stats = state.aggregate_stats();
        assert_eq!(stats.translations_total, 4);
        assert_eq!(stats.translations_succeeded, 3);
        assert_eq!(stats.translations_failed, 1);
        assert_eq!(stats.avg_processing_time_ms, 20.0);
        assert_eq!(stats.success_rate_percent, 75.0);
        assert_eq!(stats.connections_total, 1);
        assert_eq!(stats.connections_active, 0);
    }

    #[test]
    fn test_empty_stats_have_zero_averages() {
        let engine = Arc::new(ScriptedEngine::always(Scripted::Hang));
        let stats = AppState::new(AppConfig::default(), engine).aggregate_stats();
        assert_eq!(stats.avg_processing_time_ms, 0.0);
        assert_eq!(stats.success_rate_percent, 0.0);
    }
}
