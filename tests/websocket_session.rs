//! End-to-end tests: a real actix-web server on an ephemeral port, an
//! in-process translation engine, and a tokio-tungstenite client.

use actix_web::{dev::ServerHandle, web, App, HttpServer};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use float_translation_backend::config::AppConfig;
use float_translation_backend::housekeeping::Housekeeping;
use float_translation_backend::state::AppState;
use float_translation_backend::translation::{EngineFailure, EngineReply, EngineRequest, TranslationEngine};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Echoes the request audio back with a fixed transcript.
struct EchoEngine;

#[async_trait]
impl TranslationEngine for EchoEngine {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn probe(&self) -> Result<(), EngineFailure> {
        Ok(())
    }

    async fn translate(&self, request: &EngineRequest) -> Result<EngineReply, EngineFailure> {
        Ok(EngineReply {
            audio: request.audio.clone(),
            text: format!("{}->{}", request.source.code, request.target.code),
            confidence: Some(0.92),
            is_final: true,
        })
    }
}

/// Refuses every request.
struct RejectingEngine;

#[async_trait]
impl TranslationEngine for RejectingEngine {
    fn model_name(&self) -> &str {
        "rejecting"
    }

    async fn probe(&self) -> Result<(), EngineFailure> {
        Ok(())
    }

    async fn translate(&self, _request: &EngineRequest) -> Result<EngineReply, EngineFailure> {
        Err(EngineFailure::Rejected {
            status: 400,
            message: "bad audio".to_string(),
        })
    }
}

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    handle: ServerHandle,
}

impl TestServer {
    async fn start(config: AppConfig, engine: Arc<dyn TranslationEngine>) -> Self {
        let routes = float_translation_backend::routes(&config.server);
        let state = AppState::new(config, engine);
        let app_state = state.clone();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .configure(&routes)
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("bind ephemeral port");
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self { addr, state, handle }
    }

    async fn connect(&self, session_id: &str) -> Client {
        let url = format!("ws://{}/ws/translation/{}", self.addr, session_id);
        let (client, _) = connect_async(url).await.expect("websocket handshake");
        client
    }

    async fn stop(self) {
        self.handle.stop(false).await;
    }
}

fn tone_pcm(samples: usize) -> Vec<u8> {
    (0..samples)
        .map(|i| ((i as f32 * 0.1).sin() * 8_000.0) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

fn chunk(session_id: Uuid, sequence_id: u64) -> Message {
    chunk_of(session_id, sequence_id, 1_600)
}

fn chunk_of(session_id: Uuid, sequence_id: u64, samples: usize) -> Message {
    Message::Text(
        json!({
            "session_id": session_id.to_string(),
            "audio_chunk": BASE64.encode(tone_pcm(samples)),
            "chunk_index": sequence_id,
            "sequence_id": sequence_id,
            "language_pair": {"source": "en", "target": "es"}
        })
        .to_string(),
    )
}

/// Next text frame as JSON; `None` when the server closed instead.
async fn next_event(client: &mut Client) -> Result<Value, Option<u16>> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("server went silent");
        match frame {
            Some(Ok(Message::Text(text))) => {
                return Ok(serde_json::from_str(&text).expect("server sent invalid JSON"));
            }
            Some(Ok(Message::Close(frame))) => return Err(frame.map(|f| u16::from(f.code))),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Err(None),
        }
    }
}

async fn next_json(client: &mut Client) -> Value {
    next_event(client).await.expect("expected a text frame")
}

#[actix_web::test]
async fn test_chunk_is_acked_then_translated() {
    let server = TestServer::start(AppConfig::default(), Arc::new(EchoEngine)).await;
    let id = Uuid::new_v4();
    let mut client = server.connect(&id.to_string()).await;

    let connected = next_json(&mut client).await;
    assert_eq!(connected["message_type"], "connected");
    assert_eq!(connected["session_id"], id.to_string());

    client.send(chunk(id, 1)).await.unwrap();

    let ack = next_json(&mut client).await;
    assert_eq!(ack["message_type"], "ack");
    assert_eq!(ack["ack_sequence_id"], 1);

    let transcript = next_json(&mut client).await;
    assert_eq!(transcript["message_type"], "final_transcript");
    assert_eq!(transcript["final_transcript"], "en->es");
    assert_eq!(transcript["sequence_id"], 1);
    let confidence = transcript["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(transcript["processing_time_ms"].as_f64().unwrap() >= 0.0);
    assert!(transcript["audio_chunk"].is_string());

    let stats = server.state.aggregate_stats();
    assert_eq!(stats.translations_succeeded, 1);
    assert_eq!(stats.connections_active, 1);
    assert_eq!(server.state.registry.get(id).unwrap().last_acknowledged_seq, 1);

    client.close(None).await.unwrap();
    server.stop().await;
}

#[actix_web::test]
async fn test_two_second_chunk_fits_in_one_frame() {
    let server = TestServer::start(AppConfig::default(), Arc::new(EchoEngine)).await;
    let id = Uuid::new_v4();
    let mut client = server.connect(&id.to_string()).await;
    next_json(&mut client).await;

    // 2 s of 16 kHz mono: 64,000 PCM bytes, ~85 KB once base64'd into JSON.
    let frame = chunk_of(id, 1, 32_000);
    assert!(frame.len() > 64 * 1024);
    client.send(frame).await.unwrap();

    let ack = next_json(&mut client).await;
    assert_eq!(ack["message_type"], "ack");
    assert_eq!(ack["ack_sequence_id"], 1);

    let transcript = next_json(&mut client).await;
    assert_eq!(transcript["message_type"], "final_transcript");
    assert!(server.state.registry.contains(id));

    server.stop().await;
}

#[actix_web::test]
async fn test_invalid_units_do_not_end_the_session() {
    let server = TestServer::start(AppConfig::default(), Arc::new(EchoEngine)).await;
    let id = Uuid::new_v4();
    let mut client = server.connect(&id.to_string()).await;
    next_json(&mut client).await;

    let missing_audio = json!({"session_id": id.to_string(), "sequence_id": 3}).to_string();
    client.send(Message::Text(missing_audio)).await.unwrap();
    let error = next_json(&mut client).await;
    assert_eq!(error["message_type"], "error");
    assert_eq!(error["error_code"], "INVALID_MESSAGE_FORMAT");

    client.send(Message::Text("{not json".to_string())).await.unwrap();
    let error = next_json(&mut client).await;
    assert_eq!(error["error_code"], "JSON_PARSE_ERROR");

    client.send(Message::Binary(vec![1, 2, 3, 4])).await.unwrap();
    let error = next_json(&mut client).await;
    assert_eq!(error["error_code"], "INVALID_MESSAGE_FORMAT");

    client.send(chunk(id, 7)).await.unwrap();
    let ack = next_json(&mut client).await;
    assert_eq!(ack["message_type"], "ack");
    assert_eq!(ack["ack_sequence_id"], 7);

    server.stop().await;
}

#[actix_web::test]
async fn test_invalid_session_id_is_closed_with_4000() {
    let server = TestServer::start(AppConfig::default(), Arc::new(EchoEngine)).await;
    let mut client = server.connect("not-a-uuid").await;

    assert_eq!(next_event(&mut client).await.err(), Some(Some(4000)));
    assert!(server.state.registry.is_empty());

    server.stop().await;
}

#[actix_web::test]
async fn test_duplicate_session_is_closed_with_4009() {
    let server = TestServer::start(AppConfig::default(), Arc::new(EchoEngine)).await;
    let id = Uuid::new_v4();
    let mut first = server.connect(&id.to_string()).await;
    next_json(&mut first).await;

    let mut second = server.connect(&id.to_string()).await;
    assert_eq!(next_event(&mut second).await.err(), Some(Some(4009)));

    // The original connection is unaffected.
    first.send(chunk(id, 1)).await.unwrap();
    assert_eq!(next_json(&mut first).await["message_type"], "ack");

    server.stop().await;
}

#[actix_web::test]
async fn test_quiet_client_receives_keepalive() {
    let mut config = AppConfig::default();
    config.session.receive_timeout_ms = 200;
    let server = TestServer::start(config, Arc::new(EchoEngine)).await;
    let id = Uuid::new_v4();
    let mut client = server.connect(&id.to_string()).await;
    next_json(&mut client).await;

    let keepalive = next_json(&mut client).await;
    assert_eq!(keepalive["message_type"], "keepalive");
    assert_eq!(keepalive["session_id"], id.to_string());
    assert!(server.state.registry.contains(id));

    server.stop().await;
}

#[actix_web::test]
async fn test_engine_rejection_ends_session_with_1011() {
    let server = TestServer::start(AppConfig::default(), Arc::new(RejectingEngine)).await;
    let id = Uuid::new_v4();
    let mut client = server.connect(&id.to_string()).await;
    next_json(&mut client).await;

    client.send(chunk(id, 1)).await.unwrap();
    assert_eq!(next_json(&mut client).await["message_type"], "ack");

    let error = next_json(&mut client).await;
    assert_eq!(error["error_code"], "TRANSLATION_ERROR");
    assert_eq!(next_event(&mut client).await.err(), Some(Some(1011)));

    server.stop().await;
}

#[actix_web::test]
async fn test_idle_session_is_evicted() {
    let mut config = AppConfig::default();
    config.session.idle_timeout_ms = 100;
    config.session.sweep_interval_ms = 100;
    let server = TestServer::start(config, Arc::new(EchoEngine)).await;
    let housekeeping = Housekeeping::spawn(server.state.clone());

    let id = Uuid::new_v4();
    let mut client = server.connect(&id.to_string()).await;
    next_json(&mut client).await;

    assert_eq!(next_event(&mut client).await.err(), Some(Some(1001)));
    assert!(!server.state.registry.contains(id));

    housekeeping.shutdown();
    server.stop().await;
}

#[actix_web::test]
async fn test_reporting_endpoints_see_live_session() {
    let server = TestServer::start(AppConfig::default(), Arc::new(EchoEngine)).await;
    let id = Uuid::new_v4();
    let mut client = server.connect(&id.to_string()).await;
    next_json(&mut client).await;

    let base = format!("http://{}", server.addr);
    let http = reqwest::Client::new();

    let sessions: Value = http
        .get(format!("{}/sessions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions["count"], 1);
    assert_eq!(sessions["sessions"][0]["session_id"], id.to_string());

    let health: Value = http
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_connections"], 1);

    let languages: Value = http
        .get(format!("{}/languages", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(languages["count"], 23);

    server.stop().await;
}

#[actix_web::test]
async fn test_reporting_endpoints_are_rate_limited_per_route() {
    let server = TestServer::start(AppConfig::default(), Arc::new(EchoEngine)).await;
    let base = format!("http://{}", server.addr);
    let http = reqwest::Client::new();

    for _ in 0..10 {
        let resp = http.get(format!("{}/stats", base)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }
    let resp = http.get(format!("{}/stats", base)).send().await.unwrap();
    assert_eq!(resp.status(), 429);

    // Separate quotas: /stats being exhausted leaves the others alone.
    let resp = http.get(format!("{}/sessions", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    for _ in 0..20 {
        let resp = http.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    server.stop().await;
}
