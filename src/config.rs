//! # Configuration Management
//!
//! Loads the relay configuration from several sources, highest priority last:
//! 1. Built-in defaults (the `Default` impl below)
//! 2. Optional `config.toml` next to the binary
//! 3. Environment variables prefixed with `APP_`, nested keys joined by `__`
//!    (for example `APP_SESSION__RECEIVE_TIMEOUT_MS=5000`)
//! 4. `HOST` / `PORT`, which deployment platforms set without a prefix
//!
//! ## Key Sections:
//! - **server**: bind address
//! - **engine**: remote translation engine endpoint and retry policy
//! - **session**: liveness deadlines and housekeeping cadence
//! - **audio**: conditioning pipeline stages and their parameters
//!
//! The engine credential is deliberately not part of [`AppConfig`]; it is read
//! from the environment variable named by `engine.api_key_env` at startup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Floor for `session.max_frame_bytes`; matches the WebSocket codec default.
pub const MIN_FRAME_BYTES: usize = 64 * 1024;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
}

/// Server bind settings.
///
/// `host = "0.0.0.0"` accepts connections on every interface, which is what
/// container deployments expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-client quota for `GET /health`.
    pub health_requests_per_minute: u32,
    /// Per-client quota for `GET /stats` and for `GET /sessions`, each
    /// counted separately.
    pub reporting_requests_per_minute: u32,
}

/// Remote translation engine settings.
///
/// ## Fields:
/// - `endpoint`: inference URL the translate request is POSTed to
/// - `model_name`: reported through the status endpoints
/// - `api_key_env`: name of the environment variable holding the bearer token
/// - `attempt_timeout_ms`: ceiling for a single engine call
/// - `max_attempts`: total attempts per chunk, including the first one
/// - `retry_base_delay_ms`: linear backoff unit (`attempt × base`)
/// - `probe_on_startup`: refuse to start when the engine is unreachable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub endpoint: String,
    pub model_name: String,
    pub api_key_env: String,
    pub attempt_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub probe_on_startup: bool,
}

/// Session liveness and housekeeping cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_concurrent_sessions: usize,
    /// Bounded wait for the next inbound unit before a keepalive is emitted.
    pub receive_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub stats_interval_ms: u64,
    /// Largest inbound WebSocket frame accepted, in bytes.
    pub max_frame_bytes: usize,
}

/// Audio conditioning pipeline settings.
///
/// Every stage can be switched off on its own. Levels are fractions of full
/// scale, cutoffs are in Hz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub highpass_enabled: bool,
    pub agc_enabled: bool,
    pub bandpass_enabled: bool,
    pub normalize_enabled: bool,
    pub highpass_cutoff_hz: f32,
    pub agc_window: usize,
    pub agc_target_level: f32,
    pub agc_max_gain: f32,
    pub bandpass_low_hz: f32,
    pub bandpass_high_hz: f32,
    pub normalize_peak: f32,
    pub safety_peak: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                health_requests_per_minute: 100,
                reporting_requests_per_minute: 10,
            },
            engine: EngineConfig::default(),
            session: SessionConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api-inference.huggingface.co/models/facebook/seamless-m4t-v2-large"
                .to_string(),
            model_name: "facebook/seamless-m4t-v2-large".to_string(),
            api_key_env: "HUGGINGFACE_API_KEY".to_string(),
            attempt_timeout_ms: 60_000,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            probe_on_startup: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 500,
            receive_timeout_ms: 30_000,
            idle_timeout_ms: 300_000,
            sweep_interval_ms: 60_000,
            stats_interval_ms: 300_000,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            highpass_enabled: true,
            agc_enabled: true,
            bandpass_enabled: true,
            normalize_enabled: true,
            highpass_cutoff_hz: 80.0,
            agc_window: 1024,
            agc_target_level: 0.7,
            agc_max_gain: 3.0,
            bandpass_low_hz: 80.0,
            bandpass_high_hz: 8_000.0,
            normalize_peak: 0.8,
            safety_peak: 0.95,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`
    /// - `APP_ENGINE__MAX_ATTEMPTS=5`
    /// - `APP_AUDIO__AGC_ENABLED=false`
    /// - `PORT=3000` (platform override)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values that would make the relay misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.server.health_requests_per_minute == 0 || self.server.reporting_requests_per_minute == 0 {
            return Err(anyhow::anyhow!("Server request quotas must be greater than 0"));
        }

        if self.engine.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Engine endpoint must be set"));
        }
        if self.engine.max_attempts == 0 {
            return Err(anyhow::anyhow!("Engine max_attempts must be at least 1"));
        }
        if self.engine.attempt_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Engine attempt_timeout_ms must be greater than 0"));
        }

        let session = &self.session;
        if session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }
        if session.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(anyhow::anyhow!(
                "Session max_frame_bytes must be at least {} bytes",
                MIN_FRAME_BYTES
            ));
        }
        for (name, value) in [
            ("receive_timeout_ms", session.receive_timeout_ms),
            ("idle_timeout_ms", session.idle_timeout_ms),
            ("sweep_interval_ms", session.sweep_interval_ms),
            ("stats_interval_ms", session.stats_interval_ms),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("Session {} must be greater than 0", name));
            }
        }

        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample_rate must be greater than 0"));
        }
        if audio.agc_window < 2 {
            return Err(anyhow::anyhow!("AGC window must span at least 2 samples"));
        }
        if audio.agc_max_gain < 1.0 {
            return Err(anyhow::anyhow!("AGC max gain must be at least 1.0"));
        }
        for (name, level) in [
            ("agc_target_level", audio.agc_target_level),
            ("normalize_peak", audio.normalize_peak),
            ("safety_peak", audio.safety_peak),
        ] {
            if !(level > 0.0 && level <= 1.0) {
                return Err(anyhow::anyhow!("Audio {} must be within (0, 1], got {}", name, level));
            }
        }

        Ok(())
    }
}

impl EngineConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl SessionConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
