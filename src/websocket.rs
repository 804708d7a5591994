//! # WebSocket Translation Handler
//!
//! Realtime speech translation over WebSocket. Clients connect to
//! `/ws/translation/{session_id}` and stream JSON audio chunks; the server
//! answers with acks, transcripts and errors as JSON text frames.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: session id comes from the path; server sends `connected`
//! 2. **Audio Streaming**: client sends `{session_id, audio_chunk, sequence_id, ...}`
//! 3. **Acknowledgment**: `ack` is written before the chunk is translated
//! 4. **Results**: `partial_transcript` / `final_transcript`, or `error`
//! 5. **Liveness**: server sends `keepalive` when the client goes quiet
//!
//! ## Close Codes:
//! - **4000**: invalid session id in the path
//! - **4009**: session id already connected
//! - **1013**: server at capacity
//! - **1001**: evicted for inactivity
//! - **1011**: unrecoverable translation failure
//!
//! The protocol rules live in [`ProtocolEngine`]; this actor only moves
//! frames, timers and spawned translations in and out of it.

use crate::protocol::{Connected, DrainReason, ProtocolEngine, Step, TranslationFinished, TranslationJob};
use crate::session::{EvictionReason, SessionMetadata};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::http::header::USER_AGENT;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use tracing::{debug, error, info, warn};

/// Handshake header carrying an optional "src-tgt" language hint.
pub const LANGUAGE_PAIR_HEADER: &str = "x-language-pair";

/// Delivers a finished translation back onto the connection's actor.
#[derive(Message)]
#[rtype(result = "()")]
struct TranslationDone(TranslationFinished);

/// One WebSocket connection.
pub struct TranslationSocket {
    state: AppState,
    raw_session_id: String,
    /// Consumed by the handshake in `started`.
    metadata: Option<SessionMetadata>,
    /// `None` until the handshake succeeds and after the actor stops.
    engine: Option<ProtocolEngine>,
    receive_deadline: Option<SpawnHandle>,
}

impl TranslationSocket {
    pub fn new(state: AppState, raw_session_id: String, metadata: SessionMetadata) -> Self {
        Self {
            state,
            raw_session_id,
            metadata: Some(metadata),
            engine: None,
            receive_deadline: None,
        }
    }

    /// (Re)start the bounded wait for the next inbound frame.
    fn arm_receive_deadline(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(handle) = self.receive_deadline.take() {
            ctx.cancel_future(handle);
        }
        let timeout = self.state.config.session.receive_timeout();
        self.receive_deadline = Some(ctx.run_later(timeout, |act, ctx| {
            act.receive_deadline = None;
            let keepalive = act.engine.as_mut().and_then(|engine| engine.on_receive_timeout());
            if let Some(message) = keepalive {
                ctx.text(message.to_json());
                act.arm_receive_deadline(ctx);
            }
        }));
    }

    fn apply(&mut self, step: Step, ctx: &mut ws::WebsocketContext<Self>) {
        for reply in step.replies {
            ctx.text(reply.to_json());
        }
        if let Some(job) = step.dispatch {
            self.dispatch(job, ctx);
        }
        if step.terminate {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Away,
                description: Some("Session closed".to_string()),
            }));
            ctx.stop();
        }
    }

    /// Run a translation off the connection and route its result back here.
    ///
    /// The job runs in its own task so a panic inside it surfaces as a
    /// `JoinError` instead of taking the connection down silently.
    fn dispatch(&self, job: TranslationJob, ctx: &mut ws::WebsocketContext<Self>) {
        let addr = ctx.address();
        let ticket = job.ticket();
        tokio::spawn(async move {
            let finished = match tokio::spawn(job.run()).await {
                Ok(finished) => finished,
                Err(err) => {
                    error!(chunk_index = ticket.chunk_index, error = %err, "Translation task failed");
                    TranslationFinished::internal_failure(ticket, format!("translation task failed: {}", err))
                }
            };
            addr.do_send(TranslationDone(finished));
        });
    }

    fn on_evicted(&mut self, reason: EvictionReason, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(engine) = self.engine.as_mut() {
            info!(session_id = %engine.session_id(), %reason, "Closing evicted session");
            engine.begin_drain(DrainReason::Evicted);
        }
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Away,
            description: Some(reason.to_string()),
        }));
        ctx.stop();
    }
}

impl Actor for TranslationSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Perform the handshake as soon as the upgrade completes.
    fn started(&mut self, ctx: &mut Self::Context) {
        let metadata = self.metadata.take().unwrap_or_default();

        match ProtocolEngine::connect(&self.state, &self.raw_session_id, metadata) {
            Ok(Connected { engine, greeting, eviction }) => {
                ctx.text(greeting.to_json());
                self.engine = Some(engine);

                ctx.spawn(eviction.wait().into_actor(self).map(|reason, act, ctx| {
                    if let Some(reason) = reason {
                        act.on_evicted(reason, ctx);
                    }
                }));
                self.arm_receive_deadline(ctx);
            }
            Err(rejection) => {
                warn!(
                    raw_session_id = %self.raw_session_id,
                    close_code = rejection.close_code,
                    reason = %rejection.reason,
                    "Rejected WebSocket handshake"
                );
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::from(rejection.close_code),
                    description: Some(rejection.reason),
                }));
                ctx.stop();
            }
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(mut engine) = self.engine.take() {
            engine.begin_drain(DrainReason::Disconnected);
            engine.close();
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranslationSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.arm_receive_deadline(ctx);
                if let Some(engine) = self.engine.as_mut() {
                    let step = engine.on_text(&text);
                    self.apply(step, ctx);
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.arm_receive_deadline(ctx);
                if let Some(engine) = self.engine.as_mut() {
                    let step = engine.on_binary(data.len());
                    self.apply(step, ctx);
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.raw_session_id, ?reason, "Client closed connection");
                if let Some(engine) = self.engine.as_mut() {
                    engine.begin_drain(DrainReason::Disconnected);
                }
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.raw_session_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(session_id = %self.raw_session_id, error = %err, "WebSocket protocol error");
                if let Some(engine) = self.engine.as_mut() {
                    engine.begin_drain(DrainReason::Disconnected);
                }
                ctx.stop();
            }
        }
    }
}

impl Handler<TranslationDone> for TranslationSocket {
    type Result = ();

    fn handle(&mut self, msg: TranslationDone, ctx: &mut Self::Context) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let Some(completion) = engine.on_translation(msg.0) else {
            return;
        };

        ctx.text(completion.reply.to_json());
        if completion.terminate {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Error,
                description: Some("Translation failed".to_string()),
            }));
            ctx.stop();
        }
    }
}

/// Connection details recorded with the session.
fn session_metadata(req: &HttpRequest) -> SessionMetadata {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    SessionMetadata {
        language_pair: header(LANGUAGE_PAIR_HEADER),
        client_ip: req.connection_info().realip_remote_addr().map(str::to_string),
        user_agent: header(USER_AGENT.as_str()),
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// The upgrade always succeeds for a well-formed WebSocket request; session
/// id validation and registration happen in the actor so rejections can be
/// reported with a close code.
pub async fn translation_socket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let metadata = session_metadata(&req);
    debug!(
        client_ip = metadata.client_ip.as_deref().unwrap_or("unknown"),
        "WebSocket upgrade requested"
    );

    let max_frame_bytes = state.config.session.max_frame_bytes;
    let socket = TranslationSocket::new(state.get_ref().clone(), path.into_inner(), metadata);
    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(max_frame_bytes)
        .start()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_session_metadata_from_handshake() {
        let req = TestRequest::default()
            .insert_header((USER_AGENT, "float-client/1.0"))
            .insert_header((LANGUAGE_PAIR_HEADER, "en-hi"))
            .peer_addr("10.1.2.3:5555".parse().unwrap())
            .to_http_request();

        let metadata = session_metadata(&req);
        assert_eq!(metadata.user_agent.as_deref(), Some("float-client/1.0"));
        assert_eq!(metadata.language_pair.as_deref(), Some("en-hi"));
        assert!(metadata.client_ip.unwrap().starts_with("10.1.2.3"));
    }

    #[test]
    fn test_session_metadata_without_headers() {
        let req = TestRequest::default().to_http_request();
        let metadata = session_metadata(&req);
        assert!(metadata.user_agent.is_none());
        assert!(metadata.language_pair.is_none());
    }
}
