//! # Float Translation Backend
//!
//! Realtime speech-to-speech translation relay. Clients stream PCM audio over
//! a WebSocket; each chunk is acknowledged, conditioned, sent to a remote
//! translation engine and answered with a transcript and translated audio.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **audio**: PCM codec and the conditioning pipeline
//! - **translation**: language table, engine client, retrying gateway
//! - **session**: registry of live sessions
//! - **protocol**: wire messages and the per-connection state machine
//! - **websocket**: actix actor that drives the protocol engine
//! - **housekeeping**: idle eviction and periodic statistics
//! - **health** / **handlers**: read-only HTTP reporting, rate limited per
//!   client IP
//! - **error**: HTTP error responses

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod housekeeping;
pub mod protocol;
pub mod session;
pub mod state;
pub mod translation;
pub mod websocket;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::web;
use crate::config::ServerConfig;
use std::time::Duration;

/// Build the route table. Shared by the binary and the integration tests.
///
/// The rate limiters are created here, once, so every worker that applies
/// the returned closure draws from the same per-IP buckets. `/sessions` and
/// `/sessions/{id}` share a bucket; `/stats` has its own.
pub fn routes(server: &ServerConfig) -> impl Fn(&mut web::ServiceConfig) + Clone + Send + 'static {
    let per_minute = |requests: u32| {
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60) / requests.max(1))
            .burst_size(requests.max(1))
            .finish()
            .unwrap_or_default()
    };
    let health_quota = per_minute(server.health_requests_per_minute);
    let stats_quota = per_minute(server.reporting_requests_per_minute);
    let sessions_quota = per_minute(server.reporting_requests_per_minute);

    move |cfg: &mut web::ServiceConfig| {
        cfg.service(
            web::resource("/health")
                .wrap(Governor::new(&health_quota))
                .route(web::get().to(health::health_check)),
        )
        .service(
            web::resource("/stats")
                .wrap(Governor::new(&stats_quota))
                .route(web::get().to(health::stats)),
        )
        .service(
            web::resource("/sessions")
                .wrap(Governor::new(&sessions_quota))
                .route(web::get().to(handlers::list_sessions)),
        )
        .service(
            web::resource("/sessions/{id}")
                .wrap(Governor::new(&sessions_quota))
                .route(web::get().to(handlers::get_session)),
        )
        .route("/languages", web::get().to(handlers::list_languages))
        .route(
            "/ws/translation/{session_id}",
            web::get().to(websocket::translation_socket),
        );
    }
}
