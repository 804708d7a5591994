//! # Translation Engine Client
//!
//! The engine is an opaque remote service: it takes `(audio, source, target)`
//! and returns translated audio, or fails. [`TranslationEngine`] is the seam
//! the gateway depends on; [`HttpTranslationEngine`] is the production
//! implementation speaking the hosted inference API over HTTPS.
//!
//! ## Status Mapping:
//! - **2xx**: success, body must carry base64 `audio_chunks`
//! - **429 / 5xx**: [`EngineFailure::Unavailable`] (retryable, honours `Retry-After`)
//! - **other 4xx**: [`EngineFailure::Rejected`] (not retried)
//! - **connection errors**: [`EngineFailure::Transport`] (retryable)

use crate::config::EngineConfig;
use crate::translation::error::EngineFailure;
use crate::translation::languages::Language;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Confidence reported when the engine response carries no score.
pub const DEFAULT_CONFIDENCE: f32 = 0.85;

/// One translate call, reused verbatim across retry attempts.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub audio: Vec<u8>,
    pub source: &'static Language,
    pub target: &'static Language,
}

/// Successful engine answer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReply {
    /// Translated 16-bit PCM.
    pub audio: Vec<u8>,
    pub text: String,
    pub confidence: Option<f32>,
    pub is_final: bool,
}

#[async_trait]
pub trait TranslationEngine: Send + Sync {
    fn model_name(&self) -> &str;

    /// Cheap reachability check used at startup.
    async fn probe(&self) -> Result<(), EngineFailure>;

    async fn translate(&self, request: &EngineRequest) -> Result<EngineReply, EngineFailure>;
}

/// Engine reached over the hosted inference HTTP API.
pub struct HttpTranslationEngine {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
    api_key: String,
}

impl HttpTranslationEngine {
    pub fn new(config: &EngineConfig, api_key: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("float-translation-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model_name: config.model_name.clone(),
            api_key,
        })
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct TranslatePayload<'a> {
    inputs: TranslateInputs<'a>,
    parameters: TranslateParameters,
}

#[derive(Debug, Serialize)]
struct TranslateInputs<'a> {
    audio: String,
    source_lang: &'a str,
    target_lang: &'a str,
    task: &'static str,
}

#[derive(Debug, Serialize)]
struct TranslateParameters {
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    max_new_tokens: u32,
    do_sample: bool,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    audio_chunks: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    is_final: Option<bool>,
}

impl<'a> TranslatePayload<'a> {
    fn new(request: &'a EngineRequest) -> Self {
        Self {
            inputs: TranslateInputs {
                audio: BASE64.encode(&request.audio),
                source_lang: request.source.engine_code,
                target_lang: request.target.engine_code,
                task: "s2st",
            },
            parameters: TranslateParameters {
                generation_config: GenerationConfig {
                    max_new_tokens: 1024,
                    do_sample: false,
                },
            },
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success status to the failure class the gateway retries on.
pub fn classify_status(status: StatusCode, message: String, retry_after: Option<Duration>) -> EngineFailure {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        EngineFailure::Unavailable {
            status: status.as_u16(),
            message,
            retry_after,
        }
    } else {
        EngineFailure::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn decode_reply(body: TranslateResponse) -> Result<EngineReply, EngineFailure> {
    let encoded = body
        .audio_chunks
        .ok_or_else(|| EngineFailure::InvalidResponse("no audio in engine response".into()))?;
    let audio = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| EngineFailure::InvalidResponse(format!("audio is not valid base64: {}", e)))?;

    Ok(EngineReply {
        audio,
        text: body.text.unwrap_or_default(),
        confidence: body.confidence,
        is_final: body.is_final.unwrap_or(true),
    })
}

#[async_trait]
impl TranslationEngine for HttpTranslationEngine {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn probe(&self) -> Result<(), EngineFailure> {
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| EngineFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = parse_retry_after(response.headers());
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message, retry_after))
    }

    async fn translate(&self, request: &EngineRequest) -> Result<EngineReply, EngineFailure> {
        debug!(
            source = request.source.code,
            target = request.target.code,
            bytes = request.audio.len(),
            "Sending translate request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&TranslatePayload::new(request))
            .send()
            .await
            .map_err(|e| EngineFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status, message, retry_after));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| EngineFailure::InvalidResponse(e.to_string()))?;
        decode_reply(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::languages::lookup;

    #[test]
    fn test_payload_shape() {
        let request = EngineRequest {
            audio: vec![0, 0, 1, 0],
            source: lookup("en").unwrap(),
            target: lookup("hi").unwrap(),
        };
        let json = serde_json::to_value(TranslatePayload::new(&request)).unwrap();
        assert_eq!(json["inputs"]["task"], "s2st");
        assert_eq!(json["inputs"]["source_lang"], "eng");
        assert_eq!(json["inputs"]["target_lang"], "hin");
        assert_eq!(json["inputs"]["audio"], "AAABAA==");
        assert_eq!(json["parameters"]["generation_config"]["max_new_tokens"], 1024);
        assert_eq!(json["parameters"]["generation_config"]["do_sample"], false);
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new(), None).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new(), None).is_retryable());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, String::new(), None).is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, String::new(), None).is_retryable());
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_reply_requires_audio() {
        let missing = TranslateResponse {
            audio_chunks: None,
            text: Some("hello".into()),
            confidence: None,
            is_final: None,
        };
        assert!(matches!(decode_reply(missing), Err(EngineFailure::InvalidResponse(_))));

        let ok = TranslateResponse {
            audio_chunks: Some("AAABAA==".into()),
            text: None,
            confidence: Some(0.5),
            is_final: None,
        };
        let reply = decode_reply(ok).unwrap();
        assert_eq!(reply.audio, vec![0, 0, 1, 0]);
        assert!(reply.is_final);
        assert_eq!(reply.confidence, Some(0.5));
    }
}
