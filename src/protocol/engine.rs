//! # Protocol Engine
//!
//! Transport-agnostic state machine for one translation connection. The
//! WebSocket actor feeds it events (text frame, binary frame, receive
//! deadline, translation finished, disconnect) and writes out whatever
//! [`OutboundMessage`]s it returns. Nothing in here knows about actix.
//!
//! ## States:
//! ```text
//! Connecting ──connect()──▶ Active ──disconnect / fatal error / eviction──▶ Draining ──close()──▶ Closed
//! ```
//! `Connecting` only exists inside [`ProtocolEngine::connect`]: a handshake
//! either produces an `Active` engine or a [`HandshakeRejection`] with nothing
//! registered.
//!
//! ## Ordering:
//! The `ack` for a chunk is returned from [`ProtocolEngine::on_text`] together
//! with the [`TranslationJob`], so the transport writes the ack before the job
//! is even spawned. Results for different chunks of one session may complete
//! in any order.

use crate::audio::AudioConditioner;
use crate::protocol::messages::{
    parse_inbound, AudioFrame, ErrorCode, FrameError, InboundError, InboundUnit, OutboundMessage,
    TranscriptDetail,
};
use crate::session::{EvictionSignal, RegistryError, SessionMetadata, SessionRegistry};
use crate::state::{AppState, StatsCollector};
use crate::translation::{TranslationError, TranslationGateway, TranslationOutcome};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Close code for a malformed session id in the connection path.
pub const CLOSE_INVALID_SESSION_ID: u16 = 4000;
/// Close code when the session id is already connected.
pub const CLOSE_DUPLICATE_SESSION: u16 = 4009;
/// RFC 6455 "try again later".
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// Why a connection left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// Peer closed or the transport failed.
    Disconnected,
    /// Housekeeping evicted the session.
    Evicted,
    /// A translation failure the session cannot recover from.
    Fatal,
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DrainReason::Disconnected => "disconnected",
            DrainReason::Evicted => "evicted",
            DrainReason::Fatal => "fatal error",
        };
        f.write_str(reason)
    }
}

/// Handshake failure; the transport closes with `close_code` and `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct HandshakeRejection {
    pub close_code: u16,
    pub reason: String,
}

impl HandshakeRejection {
    fn from_registry(err: RegistryError) -> Self {
        let close_code = match err {
            RegistryError::DuplicateSession(_) => CLOSE_DUPLICATE_SESSION,
            RegistryError::CapacityReached(_) | RegistryError::SessionNotFound(_) => {
                CLOSE_TRY_AGAIN_LATER
            }
        };
        Self {
            close_code,
            reason: err.to_string(),
        }
    }
}

/// A freshly accepted connection.
pub struct Connected {
    pub engine: ProtocolEngine,
    /// The `connected` greeting to send first.
    pub greeting: OutboundMessage,
    /// Fires if housekeeping evicts this session.
    pub eviction: EvictionSignal,
}

/// What the transport should do after an inbound frame.
#[derive(Debug, Default)]
pub struct Step {
    /// Messages to write, in order, before anything else.
    pub replies: Vec<OutboundMessage>,
    /// Translation to run off the connection task.
    pub dispatch: Option<TranslationJob>,
    /// Stop reading and close the connection.
    pub terminate: bool,
}

impl Step {
    fn reply(message: OutboundMessage) -> Self {
        Self {
            replies: vec![message],
            ..Self::default()
        }
    }

    fn terminate() -> Self {
        Self {
            terminate: true,
            ..Self::default()
        }
    }
}

/// Message produced when a translation result is delivered.
#[derive(Debug)]
pub struct Completion {
    pub reply: OutboundMessage,
    pub terminate: bool,
}

/// Identifies which chunk a finished translation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTicket {
    pub chunk_index: u64,
    pub sequence_id: Option<u64>,
}

/// Result of running a [`TranslationJob`].
#[derive(Debug)]
pub struct TranslationFinished {
    pub ticket: JobTicket,
    pub result: Result<TranslationOutcome, TranslationError>,
}

impl TranslationFinished {
    /// Build a failure for a job that never produced a result (e.g. panicked).
    pub fn internal_failure(ticket: JobTicket, message: impl Into<String>) -> Self {
        Self {
            ticket,
            result: Err(TranslationError::Internal(message.into())),
        }
    }
}

/// One chunk's conditioning + translation, runnable on any tokio task.
pub struct TranslationJob {
    session_id: Uuid,
    ticket: JobTicket,
    frame: AudioFrame,
    received_at: Instant,
    conditioner: Arc<AudioConditioner>,
    gateway: Arc<TranslationGateway>,
    stats: Arc<StatsCollector>,
}

impl fmt::Debug for TranslationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationJob")
            .field("session_id", &self.session_id)
            .field("ticket", &self.ticket)
            .field("bytes", &self.frame.audio.len())
            .finish()
    }
}

impl TranslationJob {
    pub fn ticket(&self) -> JobTicket {
        self.ticket
    }

    /// Condition the audio, translate it and record the attempt in the stats.
    ///
    /// Stats are updated here rather than on delivery so attempts whose
    /// session closed in the meantime are still counted.
    pub async fn run(self) -> TranslationFinished {
        let conditioned = self.conditioner.condition(&self.frame.audio);
        if let Some(degradation) = &conditioned.degradation {
            warn!(
                session_id = %self.session_id,
                chunk_index = self.ticket.chunk_index,
                stage = ?degradation.stage(),
                error = %degradation,
                "Audio conditioning degraded, forwarding best available buffer"
            );
        }

        let pair = &self.frame.language_pair;
        let result = self
            .gateway
            .translate_from(self.received_at, &conditioned.pcm, &pair.source, &pair.target)
            .await;

        match &result {
            Ok(outcome) => self.stats.record_success(outcome.processing_time_ms),
            Err(_) => self.stats.record_failure(),
        }

        TranslationFinished {
            ticket: self.ticket,
            result,
        }
    }
}

/// Per-connection protocol state.
pub struct ProtocolEngine {
    session_id: Uuid,
    connection_id: u64,
    state: ConnectionState,
    opened_at: Instant,
    registry: Arc<SessionRegistry>,
    stats: Arc<StatsCollector>,
    conditioner: Arc<AudioConditioner>,
    gateway: Arc<TranslationGateway>,
}

impl ProtocolEngine {
    /// Validate the path session id and register the session.
    pub fn connect(
        state: &AppState,
        raw_session_id: &str,
        metadata: SessionMetadata,
    ) -> Result<Connected, HandshakeRejection> {
        let session_id = Uuid::parse_str(raw_session_id).map_err(|_| HandshakeRejection {
            close_code: CLOSE_INVALID_SESSION_ID,
            reason: "Invalid session ID format".to_string(),
        })?;

        let lease = state
            .registry
            .open(session_id, metadata)
            .map_err(HandshakeRejection::from_registry)?;
        state.stats.record_connection();

        info!(
            session_id = %session_id,
            client_ip = lease.session.client_ip.as_deref().unwrap_or("unknown"),
            language_pair = lease.session.language_pair.as_deref().unwrap_or("unspecified"),
            active = state.registry.len(),
            "Session registered"
        );

        let engine = ProtocolEngine {
            session_id,
            connection_id: lease.connection_id,
            state: ConnectionState::Active,
            opened_at: Instant::now(),
            registry: state.registry.clone(),
            stats: state.stats.clone(),
            conditioner: state.conditioner.clone(),
            gateway: state.gateway.clone(),
        };

        Ok(Connected {
            engine,
            greeting: OutboundMessage::connected(session_id),
            eviction: lease.eviction,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Handle one text frame.
    pub fn on_text(&mut self, text: &str) -> Step {
        if !self.is_active() {
            return Step::default();
        }
        if self.registry.record_message(self.session_id).is_err() {
            return self.lost_registration();
        }

        match parse_inbound(text, self.session_id) {
            Ok(InboundUnit::Keepalive) => {
                debug!(session_id = %self.session_id, "Client keepalive");
                Step::default()
            }
            Ok(InboundUnit::AudioChunk(frame)) => self.accept_chunk(frame),
            Err(e) => self.reject(e),
        }
    }

    /// Binary frames are not part of the protocol; report and keep going.
    pub fn on_binary(&mut self, len: usize) -> Step {
        if !self.is_active() {
            return Step::default();
        }
        if self.registry.record_message(self.session_id).is_err() {
            return self.lost_registration();
        }
        debug!(session_id = %self.session_id, bytes = len, "Rejected binary frame");
        self.reject(FrameError::BinaryFrame.into())
    }

    /// The bounded wait for the next inbound unit expired.
    pub fn on_receive_timeout(&mut self) -> Option<OutboundMessage> {
        if !self.is_active() {
            return None;
        }
        debug!(session_id = %self.session_id, "Receive deadline passed, sending keepalive");
        Some(OutboundMessage::keepalive(self.session_id))
    }

    /// Turn a finished translation into the message for the client.
    ///
    /// Results arriving after the connection left `Active` are discarded.
    pub fn on_translation(&mut self, finished: TranslationFinished) -> Option<Completion> {
        if !self.is_active() {
            debug!(
                session_id = %self.session_id,
                chunk_index = finished.ticket.chunk_index,
                "Discarding translation result for inactive session"
            );
            return None;
        }

        let ticket = finished.ticket;
        match finished.result {
            Ok(outcome) => Some(Completion {
                reply: self.transcript(ticket, outcome),
                terminate: false,
            }),
            Err(err) => {
                let code = match &err {
                    TranslationError::UnsupportedLanguage(_) => ErrorCode::UnsupportedLanguage,
                    TranslationError::MalformedPayload(_) => ErrorCode::InvalidMessageFormat,
                    TranslationError::Engine { .. }
                    | TranslationError::Rejected { .. }
                    | TranslationError::Timeout { .. } => ErrorCode::TranslationError,
                    TranslationError::Internal(_) => ErrorCode::UnexpectedError,
                };
                let fatal = !err.is_recoverable();

                if fatal {
                    error!(
                        session_id = %self.session_id,
                        chunk_index = ticket.chunk_index,
                        error = %err,
                        "Unrecoverable translation failure, closing session"
                    );
                    self.begin_drain(DrainReason::Fatal);
                } else {
                    warn!(
                        session_id = %self.session_id,
                        chunk_index = ticket.chunk_index,
                        error = %err,
                        "Translation request rejected"
                    );
                }

                let retry_after = err.retry_after().map(|d| d.as_millis() as u64);
                Some(Completion {
                    reply: OutboundMessage::error(self.session_id, code, err.to_string())
                        .with_retry_after(retry_after),
                    terminate: fatal,
                })
            }
        }
    }

    /// Leave `Active`; later frames and results are ignored.
    pub fn begin_drain(&mut self, reason: DrainReason) {
        if matches!(self.state, ConnectionState::Active | ConnectionState::Connecting) {
            debug!(session_id = %self.session_id, %reason, "Session draining");
            self.state = ConnectionState::Draining;
        }
    }

    /// Deregister and move to `Closed`. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;

        match self.registry.release(self.session_id, self.connection_id) {
            Some(snapshot) => info!(
                session_id = %self.session_id,
                duration_secs = snapshot.duration_secs(),
                messages_received = snapshot.messages_received,
                chunks_processed = snapshot.chunks_processed,
                last_acknowledged_seq = snapshot.last_acknowledged_seq,
                "Session closed"
            ),
            None => info!(
                session_id = %self.session_id,
                duration_secs = self.opened_at.elapsed().as_secs_f64(),
                "Session closed (already deregistered)"
            ),
        }
    }

    fn accept_chunk(&mut self, frame: AudioFrame) -> Step {
        let mut replies = Vec::with_capacity(1);
        if let Some(seq) = frame.sequence_id {
            if self.registry.acknowledge(self.session_id, seq).is_err() {
                return self.lost_registration();
            }
            replies.push(OutboundMessage::ack(self.session_id, seq));
        }
        if self.registry.record_chunk(self.session_id).is_err() {
            return self.lost_registration();
        }

        let ticket = JobTicket {
            chunk_index: frame.chunk_index,
            sequence_id: frame.sequence_id,
        };
        debug!(
            session_id = %self.session_id,
            chunk_index = ticket.chunk_index,
            sequence_id = ?ticket.sequence_id,
            bytes = frame.audio.len(),
            "Audio chunk accepted"
        );

        Step {
            replies,
            dispatch: Some(TranslationJob {
                session_id: self.session_id,
                ticket,
                frame,
                received_at: Instant::now(),
                conditioner: self.conditioner.clone(),
                gateway: self.gateway.clone(),
                stats: self.stats.clone(),
            }),
            terminate: false,
        }
    }

    fn reject(&self, err: InboundError) -> Step {
        warn!(session_id = %self.session_id, error = %err, "Invalid inbound message");
        Step::reply(OutboundMessage::error(self.session_id, err.error_code(), err.to_string()))
    }

    /// The registry no longer knows this session (evicted): go quiet and close.
    fn lost_registration(&mut self) -> Step {
        self.begin_drain(DrainReason::Evicted);
        Step::terminate()
    }

    fn transcript(&self, ticket: JobTicket, outcome: TranslationOutcome) -> OutboundMessage {
        let detail = TranscriptDetail {
            chunk_index: ticket.chunk_index,
            sequence_id: ticket.sequence_id,
            confidence: outcome.confidence,
            processing_time_ms: outcome.processing_time_ms.max(0.0),
            source_language: outcome.source_language.to_string(),
            target_language: outcome.target_language.to_string(),
            audio_chunk: (!outcome.audio.is_empty()).then(|| BASE64.encode(&outcome.audio)),
        };
        OutboundMessage::transcript(self.session_id, outcome.text, outcome.is_final, detail)
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        self.close();
    }
}
