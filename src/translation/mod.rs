//! # Translation Module
//!
//! Bridge between conditioned audio and the external speech-to-speech
//! translation engine.
//!
//! ## Components:
//! - **languages**: supported language table and code mapping
//! - **engine**: [`TranslationEngine`] seam and the HTTP client behind it
//! - **gateway**: retry/backoff, timeouts, safety limiting, latency accounting
//! - **error**: failure taxonomy surfaced to the protocol layer

pub mod engine;
pub mod error;
pub mod gateway;
pub mod languages;

pub use engine::{EngineReply, EngineRequest, HttpTranslationEngine, TranslationEngine};
pub use error::{EngineFailure, TranslationError};
pub use gateway::{GatewayStatus, LatencyBreakdown, RetryPolicy, TranslationGateway, TranslationOutcome};
