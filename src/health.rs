//! # Health and Statistics Endpoints
//!
//! Read-only JSON views over the process: liveness plus headline counters on
//! `/health`, the full aggregate and gateway view on `/stats`.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.aggregate_stats();
    let gateway = state.gateway.status();
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": stats.uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "active_connections": stats.connections_active,
        "total_translations": stats.translations_total,
        "engine": {
            "model": gateway.model_name,
            "status": if gateway.is_loaded { "ready" } else { "unavailable" },
            "supported_languages": gateway.supported_languages.len()
        }
    }))
}

pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.aggregate_stats();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": stats.uptime_seconds,
        "connections": {
            "total": stats.connections_total,
            "active": stats.connections_active,
            "capacity": state.registry.capacity()
        },
        "translations": {
            "total": stats.translations_total,
            "succeeded": stats.translations_succeeded,
            "failed": stats.translations_failed,
            "success_rate_percent": stats.success_rate_percent,
            "avg_processing_time_ms": stats.avg_processing_time_ms
        },
        "backpressure_events": stats.backpressure_events,
        "gateway": state.gateway.status(),
        "sessions": state.registry.len()
    }))
}
