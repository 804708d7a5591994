//! # Housekeeping Scheduler
//!
//! Two background loops that run independently of any connection:
//! - **idle sweep**: every `sweep_interval`, evict sessions idle longer than
//!   `idle_timeout`. Eviction notifies the connection actor, which closes
//!   the socket.
//! - **stats report**: every `stats_interval`, log the aggregate counters.
//!
//! Both steps are plain functions so tests can drive them without timers.

use crate::session::{EvictionReason, SessionRegistry, SessionSnapshot};
use crate::state::{AggregateStats, AppState};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Evict every session idle for longer than `idle_timeout`.
///
/// Returns the final snapshot of each evicted session.
pub fn sweep_idle_sessions(registry: &SessionRegistry, idle_timeout: Duration) -> Vec<SessionSnapshot> {
    let mut evicted = Vec::new();

    for candidate in registry.list_idle_since(idle_timeout) {
        // Re-checked under the registry lock: the session may have closed or
        // seen activity since the scan.
        if let Some(snapshot) =
            registry.evict_if_idle(candidate.session_id, idle_timeout, EvictionReason::IdleTimeout)
        {
            info!(
                session_id = %snapshot.session_id,
                idle_ms = snapshot.idle_ms,
                messages_received = snapshot.messages_received,
                chunks_processed = snapshot.chunks_processed,
                "Evicted idle session"
            );
            evicted.push(snapshot);
        }
    }

    if evicted.is_empty() {
        debug!(active = registry.len(), "Idle sweep found nothing to evict");
    }
    evicted
}

/// Snapshot the aggregate counters and emit them as one log event.
pub fn log_stats(state: &AppState) -> AggregateStats {
    let stats = state.aggregate_stats();
    info!(
        connections_total = stats.connections_total,
        connections_active = stats.connections_active,
        translations_total = stats.translations_total,
        translations_succeeded = stats.translations_succeeded,
        translations_failed = stats.translations_failed,
        success_rate_percent = stats.success_rate_percent,
        avg_processing_time_ms = stats.avg_processing_time_ms,
        backpressure_events = stats.backpressure_events,
        uptime_seconds = stats.uptime_seconds,
        "Aggregate statistics"
    );
    stats
}

/// Handles to the running loops.
pub struct Housekeeping {
    sweeper: JoinHandle<()>,
    reporter: JoinHandle<()>,
}

impl Housekeeping {
    /// Start both loops on the current tokio runtime.
    pub fn spawn(state: AppState) -> Self {
        let session = &state.config.session;
        let (idle_timeout, sweep_every, report_every) =
            (session.idle_timeout(), session.sweep_interval(), session.stats_interval());

        let registry = state.registry.clone();
        let sweeper = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + sweep_every, sweep_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_idle_sessions(&registry, idle_timeout);
            }
        });

        let reporter = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + report_every, report_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                log_stats(&state);
            }
        });

        info!(
            idle_timeout_secs = idle_timeout.as_secs(),
            sweep_interval_secs = sweep_every.as_secs(),
            stats_interval_secs = report_every.as_secs(),
            "Housekeeping started"
        );

        Self { sweeper, reporter }
    }

    /// Stop both loops.
    pub fn shutdown(self) {
        self.sweeper.abort();
        self.reporter.abort();
        info!("Housekeeping stopped");
    }
}
