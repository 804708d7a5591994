//! # Wire Messages
//!
//! JSON shapes exchanged over `/ws/translation/{session_id}`.
//!
//! ## Client → Server
//! ```json
//! {"session_id": "…", "audio_chunk": "<base64 pcm>", "chunk_index": 3,
//!  "sequence_id": 7, "language_pair": {"source": "en", "target": "hi"}}
//! ```
//! `message_type` is optional and defaults to `audio_chunk`; a unit with
//! `"message_type": "keepalive"` only refreshes the session.
//!
//! ## Server → Client
//! Every message carries `session_id`, `message_type` and `timestamp` (epoch
//! ms). Transcript messages put their text under a key equal to the message
//! type (`partial_transcript` / `final_transcript`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_SOURCE_LANGUAGE: &str = "en";
pub const DEFAULT_TARGET_LANGUAGE: &str = "hi";

/// Stable error codes clients branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessageFormat,
    JsonParseError,
    UnsupportedLanguage,
    TranslationError,
    UnexpectedError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub body: OutboundBody,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum OutboundBody {
    Connected,
    Ack {
        ack_sequence_id: u64,
    },
    PartialTranscript {
        partial_transcript: String,
        #[serde(flatten)]
        detail: TranscriptDetail,
    },
    FinalTranscript {
        final_transcript: String,
        #[serde(flatten)]
        detail: TranscriptDetail,
    },
    Error {
        error_code: ErrorCode,
        error_message: String,
        /// Suggested wait in milliseconds before retrying.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        retry_after: Option<u64>,
    },
    Keepalive,
}

/// Fields shared by both transcript variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDetail {
    pub chunk_index: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sequence_id: Option<u64>,
    pub confidence: f32,
    pub processing_time_ms: f64,
    pub source_language: String,
    pub target_language: String,
    /// Base64 translated PCM, omitted when the engine returned none.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio_chunk: Option<String>,
}

impl OutboundMessage {
    pub fn new(session_id: Uuid, body: OutboundBody) -> Self {
        Self {
            session_id,
            body,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn connected(session_id: Uuid) -> Self {
        Self::new(session_id, OutboundBody::Connected)
    }

    pub fn ack(session_id: Uuid, ack_sequence_id: u64) -> Self {
        Self::new(session_id, OutboundBody::Ack { ack_sequence_id })
    }

    pub fn keepalive(session_id: Uuid) -> Self {
        Self::new(session_id, OutboundBody::Keepalive)
    }

    pub fn error(session_id: Uuid, error_code: ErrorCode, error_message: impl Into<String>) -> Self {
        Self::new(
            session_id,
            OutboundBody::Error {
                error_code,
                error_message: error_message.into(),
                retry_after: None,
            },
        )
    }

    pub fn transcript(session_id: Uuid, text: String, is_final: bool, detail: TranscriptDetail) -> Self {
        let body = if is_final {
            OutboundBody::FinalTranscript { final_transcript: text, detail }
        } else {
            OutboundBody::PartialTranscript { partial_transcript: text, detail }
        };
        Self::new(session_id, body)
    }

    pub fn with_retry_after(mut self, millis: Option<u64>) -> Self {
        if let OutboundBody::Error { retry_after, .. } = &mut self.body {
            *retry_after = millis;
        }
        self
    }

    pub fn message_type(&self) -> &'static str {
        match self.body {
            OutboundBody::Connected => "connected",
            OutboundBody::Ack { .. } => "ack",
            OutboundBody::PartialTranscript { .. } => "partial_transcript",
            OutboundBody::FinalTranscript { .. } => "final_transcript",
            OutboundBody::Error { .. } => "error",
            OutboundBody::Keepalive => "keepalive",
        }
    }

    pub fn to_json(&self) -> String {
        // Every field is a plain string, number or enum tag.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"session_id":"{}","message_type":"error","error_code":"UNEXPECTED_ERROR","error_message":"serialization failed: {}","timestamp":{}}}"#,
                self.session_id, e, self.timestamp
            )
        })
    }
}

/// Requested translation direction for a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE_LANGUAGE.to_string(),
            target: DEFAULT_TARGET_LANGUAGE.to_string(),
        }
    }
}

/// A validated audio chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub session_id: Uuid,
    pub chunk_index: u64,
    /// `None` suppresses acknowledgment.
    pub sequence_id: Option<u64>,
    pub language_pair: LanguagePair,
    /// Decoded PCM bytes.
    pub audio: Vec<u8>,
}

/// A validated inbound unit.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundUnit {
    AudioChunk(AudioFrame),
    Keepalive,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("message must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field has the wrong type: {0}")]
    WrongType(String),

    #[error("invalid session ID format: {0}")]
    InvalidSessionId(String),

    #[error("session ID {got} does not match this connection ({expected})")]
    SessionMismatch { expected: Uuid, got: Uuid },

    #[error("audio_chunk must not be empty")]
    EmptyAudio,

    #[error("audio_chunk is not valid base64: {0}")]
    InvalidAudioEncoding(String),

    #[error("unknown message_type: {0}")]
    UnknownMessageType(String),

    #[error("binary frames are not supported; send JSON text")]
    BinaryFrame,
}

/// Why an inbound unit was refused.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl InboundError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            InboundError::Json(_) => ErrorCode::JsonParseError,
            InboundError::Frame(_) => ErrorCode::InvalidMessageFormat,
        }
    }
}

/// Loose shape used for field-by-field validation.
#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    audio_chunk: Option<String>,
    #[serde(default)]
    chunk_index: Option<u64>,
    #[serde(default)]
    sequence_id: Option<u64>,
    #[serde(default)]
    language_pair: Option<RawLanguagePair>,
}

#[derive(Debug, Deserialize)]
struct RawLanguagePair {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

/// Parse and validate one text unit received on `expected`'s connection.
pub fn parse_inbound(text: &str, expected: Uuid) -> Result<InboundUnit, InboundError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject.into());
    }
    let raw: RawInbound =
        serde_json::from_value(value).map_err(|e| FrameError::WrongType(e.to_string()))?;

    match raw.message_type.as_deref() {
        None | Some("audio_chunk") => {}
        Some("keepalive") => return Ok(InboundUnit::Keepalive),
        Some(other) => return Err(FrameError::UnknownMessageType(other.to_string()).into()),
    }

    let session_id = raw.session_id.ok_or(FrameError::MissingField("session_id"))?;
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|_| FrameError::InvalidSessionId(session_id.clone()))?;
    if session_id != expected {
        return Err(FrameError::SessionMismatch { expected, got: session_id }.into());
    }

    let encoded = raw.audio_chunk.ok_or(FrameError::MissingField("audio_chunk"))?;
    if encoded.trim().is_empty() {
        return Err(FrameError::EmptyAudio.into());
    }
    let audio = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|e| FrameError::InvalidAudioEncoding(e.to_string()))?;
    if audio.is_empty() {
        return Err(FrameError::EmptyAudio.into());
    }

    let defaults = LanguagePair::default();
    let language_pair = match raw.language_pair {
        Some(pair) => LanguagePair {
            source: pair.source.unwrap_or(defaults.source),
            target: pair.target.unwrap_or(defaults.target),
        },
        None => defaults,
    };

    Ok(InboundUnit::AudioChunk(AudioFrame {
        session_id,
        chunk_index: raw.chunk_index.unwrap_or(0),
        sequence_id: raw.sequence_id,
        language_pair,
        audio,
    }))
}
