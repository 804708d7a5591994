//! Session introspection endpoints.
//!
//! - `GET /sessions` - every live session, oldest first
//! - `GET /sessions/{id}` - one session, 404 when unknown

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.registry.snapshots();

    HttpResponse::Ok().json(json!({
        "count": sessions.len(),
        "capacity": state.registry.capacity(),
        "sessions": sessions,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn get_session(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let raw = path.into_inner();
    let id = Uuid::parse_str(&raw).map_err(|_| AppError::BadRequest(format!("Invalid session ID: {}", raw)))?;

    let session = state
        .registry
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))?;

    Ok(HttpResponse::Ok().json(json!({
        "session": session,
        "duration_secs": session.duration_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::SessionMetadata;
    use crate::translation::gateway::tests::{Scripted, ScriptedEngine};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), Arc::new(ScriptedEngine::always(Scripted::Hang)))
    }

    #[actix_web::test]
    async fn test_session_listing_and_lookup() {
        let state = state();
        let id = Uuid::new_v4();
        let _lease = state
            .registry
            .open(
                id,
                SessionMetadata {
                    language_pair: Some("en-hi".into()),
                    client_ip: Some("127.0.0.1".into()),
                    user_agent: None,
                },
            )
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/sessions", web::get().to(list_sessions))
                .route("/sessions/{id}", web::get().to(get_session)),
        )
        .await;

        let req = test::TestRequest::get().uri("/sessions").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["sessions"][0]["language_pair"], "en-hi");

        let req = test::TestRequest::get().uri(&format!("/sessions/{}", id)).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["session"]["session_id"], id.to_string());
        assert_eq!(body["session"]["client_ip"], "127.0.0.1");

        let req = test::TestRequest::get()
            .uri(&format!("/sessions/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/sessions/not-a-uuid").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
