//! # Translation Gateway
//!
//! Wraps a [`TranslationEngine`] with the policy every translate call goes
//! through:
//!
//! 1. **Language check** before anything touches the network
//! 2. **Payload check** (whole 16-bit samples, non-empty)
//! 3. **Attempts** bounded by a per-attempt timeout, with linear backoff
//!    (`attempt × base`) between retryable failures
//! 4. **Safety limiting** of the returned audio
//! 5. **Latency accounting** from four timestamps into a running status
//!
//! The gateway never holds a lock across an engine call; metrics are folded in
//! after the call returns.

use crate::audio::AudioConditioner;
use crate::config::EngineConfig;
use crate::translation::engine::{EngineReply, EngineRequest, TranslationEngine, DEFAULT_CONFIDENCE};
use crate::translation::error::{EngineFailure, TranslationError};
use crate::translation::languages::{self, Language};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Attempt budget and backoff for engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Delay slept after failed attempt `attempt` (1-based): `attempt × base`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Four timestamps taken around one translate call.
#[derive(Debug, Clone, Copy)]
pub struct LatencyTimeline {
    capture_start: Instant,
    request_sent: Option<Instant>,
    response_received: Option<Instant>,
    playback_ready: Option<Instant>,
}

impl LatencyTimeline {
    pub fn starting_at(capture_start: Instant) -> Self {
        Self {
            capture_start,
            request_sent: None,
            response_received: None,
            playback_ready: None,
        }
    }

    pub fn mark_request_sent(&mut self) {
        self.request_sent = Some(Instant::now());
    }

    pub fn mark_response_received(&mut self) {
        self.response_received = Some(Instant::now());
    }

    pub fn mark_playback_ready(&mut self) {
        self.playback_ready = Some(Instant::now());
    }

    /// Durations in milliseconds; missing marks collapse onto their predecessor.
    pub fn breakdown(&self) -> LatencyBreakdown {
        let sent = self.request_sent.unwrap_or(self.capture_start);
        let received = self.response_received.unwrap_or(sent);
        let ready = self.playback_ready.unwrap_or(received);
        let ms = |from: Instant, to: Instant| to.saturating_duration_since(from).as_secs_f64() * 1000.0;

        LatencyBreakdown {
            total_ms: ms(self.capture_start, ready),
            network_ms: ms(sent, received),
            processing_ms: ms(received, ready),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyBreakdown {
    pub total_ms: f64,
    pub network_ms: f64,
    pub processing_ms: f64,
}

/// Successful translation of one chunk.
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    /// Safety-limited translated PCM.
    pub audio: Vec<u8>,
    pub text: String,
    pub is_final: bool,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    pub source_language: &'static str,
    pub target_language: &'static str,
    pub processing_time_ms: f64,
    pub latency: LatencyBreakdown,
    pub attempts: u32,
}

/// Running totals behind [`GatewayStatus`].
#[derive(Debug, Default, Clone)]
struct GatewayMetrics {
    successes: u64,
    failures: u64,
    retries: u64,
    processing_ms_sum: f64,
    total_ms_sum: f64,
    network_ms_sum: f64,
}

/// Snapshot of the gateway for the reporting surface.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub is_loaded: bool,
    pub model_name: String,
    pub supported_languages: Vec<&'static str>,
    pub total_processed: u64,
    pub total_failed: u64,
    pub retries: u64,
    pub avg_total_latency_ms: f64,
    pub avg_network_latency_ms: f64,
    pub avg_processing_latency_ms: f64,
}

pub struct TranslationGateway {
    engine: Arc<dyn TranslationEngine>,
    conditioner: Arc<AudioConditioner>,
    policy: RetryPolicy,
    metrics: Mutex<GatewayMetrics>,
}

impl TranslationGateway {
    pub fn new(
        engine: Arc<dyn TranslationEngine>,
        conditioner: Arc<AudioConditioner>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            conditioner,
            policy,
            metrics: Mutex::new(GatewayMetrics::default()),
        }
    }

    /// Translate one conditioned chunk.
    pub async fn translate(
        &self,
        audio: &[u8],
        source: &str,
        target: &str,
    ) -> Result<TranslationOutcome, TranslationError> {
        self.translate_from(Instant::now(), audio, source, target).await
    }

    /// Same as [`translate`](Self::translate), with latency measured from
    /// `capture_start` (when the chunk arrived) instead of from this call.
    pub async fn translate_from(
        &self,
        capture_start: Instant,
        audio: &[u8],
        source: &str,
        target: &str,
    ) -> Result<TranslationOutcome, TranslationError> {
        let (source, target) = resolve_pair(source, target)?;
        check_payload(audio)?;

        let request = EngineRequest {
            audio: audio.to_vec(),
            source,
            target,
        };
        let mut timeline = LatencyTimeline::starting_at(capture_start);

        let result = self.call_with_retry(&request, &mut timeline).await;
        let (reply, attempts) = match result {
            Ok(done) => done,
            Err(e) => {
                self.metrics().failures += 1;
                error!(
                    source = source.code,
                    target = target.code,
                    error = %e,
                    "Translation failed"
                );
                return Err(e);
            }
        };

        let audio = self.conditioner.safety_limit(&reply.audio);
        timeline.mark_playback_ready();
        let latency = timeline.breakdown();

        {
            let mut metrics = self.metrics();
            metrics.successes += 1;
            metrics.processing_ms_sum += latency.processing_ms;
            metrics.total_ms_sum += latency.total_ms;
            metrics.network_ms_sum += latency.network_ms;
        }

        debug!(
            source = source.code,
            target = target.code,
            attempts,
            total_ms = latency.total_ms,
            network_ms = latency.network_ms,
            "Translation completed"
        );

        Ok(TranslationOutcome {
            audio,
            text: reply.text,
            is_final: reply.is_final,
            confidence: reply.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
            source_language: source.code,
            target_language: target.code,
            processing_time_ms: latency.total_ms,
            latency,
            attempts,
        })
    }

    async fn call_with_retry(
        &self,
        request: &EngineRequest,
        timeline: &mut LatencyTimeline,
    ) -> Result<(EngineReply, u32), TranslationError> {
        let policy = self.policy;
        let mut attempt = 0;

        loop {
            attempt += 1;
            timeline.mark_request_sent();
            let outcome = tokio::time::timeout(policy.attempt_timeout, self.engine.translate(request)).await;
            timeline.mark_response_received();

            let failure = match outcome {
                Ok(Ok(reply)) => return Ok((reply, attempt)),
                Ok(Err(failure)) if !failure.is_retryable() => {
                    return Err(match failure {
                        EngineFailure::Rejected { status, message } => {
                            TranslationError::Rejected { status, message }
                        }
                        other => TranslationError::Internal(other.to_string()),
                    });
                }
                Ok(Err(failure)) => AttemptFailure::Engine(failure),
                Err(_) => AttemptFailure::TimedOut,
            };

            if attempt >= policy.max_attempts {
                return Err(match failure {
                    AttemptFailure::TimedOut => TranslationError::Timeout {
                        attempts: attempt,
                        timeout: policy.attempt_timeout,
                    },
                    AttemptFailure::Engine(failure) => TranslationError::Engine {
                        attempts: attempt,
                        message: failure.to_string(),
                        retry_after: failure.retry_after(),
                    },
                });
            }

            let delay = policy.delay_after(attempt);
            self.metrics().retries += 1;
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Translation attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Number of retry backoffs applied since startup.
    pub fn backpressure_events(&self) -> u64 {
        self.metrics().retries
    }

    pub fn status(&self) -> GatewayStatus {
        let metrics = self.metrics().clone();
        let avg = |sum: f64| {
            if metrics.successes > 0 {
                sum / metrics.successes as f64
            } else {
                0.0
            }
        };

        GatewayStatus {
            is_loaded: true,
            model_name: self.engine.model_name().to_string(),
            supported_languages: languages::supported_codes(),
            total_processed: metrics.successes,
            total_failed: metrics.failures,
            retries: metrics.retries,
            avg_total_latency_ms: avg(metrics.total_ms_sum),
            avg_network_latency_ms: avg(metrics.network_ms_sum),
            avg_processing_latency_ms: avg(metrics.processing_ms_sum),
        }
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, GatewayMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum AttemptFailure {
    Engine(EngineFailure),
    TimedOut,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Engine(failure) => write!(f, "{}", failure),
            AttemptFailure::TimedOut => f.write_str("attempt timed out"),
        }
    }
}

fn resolve_pair(
    source: &str,
    target: &str,
) -> Result<(&'static Language, &'static Language), TranslationError> {
    let source = languages::lookup(source)
        .ok_or_else(|| TranslationError::UnsupportedLanguage(source.to_string()))?;
    let target = languages::lookup(target)
        .ok_or_else(|| TranslationError::UnsupportedLanguage(target.to_string()))?;
    Ok((source, target))
}

fn check_payload(audio: &[u8]) -> Result<(), TranslationError> {
    if audio.is_empty() {
        return Err(TranslationError::MalformedPayload("audio payload is empty".into()));
    }
    if audio.len() % 2 != 0 {
        return Err(TranslationError::MalformedPayload(format!(
            "audio payload has odd length {}; expected 16-bit samples",
            audio.len()
        )));
    }
    Ok(())
}
