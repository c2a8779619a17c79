//! Operator control surface over HTTP, consumed by the admin UI.
//!
//! `/status` is open; everything else sits behind a bearer token, and
//! `/logout` additionally demands the shared logout secret in the body.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AdminConfig;
use crate::lifecycle::ConnectionLifecycleManager;

#[derive(Clone)]
pub struct AdminState {
    pub lifecycle: Arc<ConnectionLifecycleManager>,
    pub token: String,
    pub logout_secret: String,
}

pub async fn serve(
    lifecycle: Arc<ConnectionLifecycleManager>,
    cfg: AdminConfig,
) -> anyhow::Result<()> {
    if cfg.token.is_empty() {
        warn!("admin token not configured; control routes will reject everything");
    }
    let state = AdminState {
        lifecycle,
        token: cfg.token,
        logout_secret: cfg.logout_secret,
    };
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    info!(addr = %cfg.listen_addr, "admin server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

pub fn build_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/start-session", post(start_session))
        .route("/logout", post(logout))
        .route("/switch-session", post(switch_session))
        .route("/sessions", get(sessions))
        .route("/reset-session", post(reset_session))
        .route("/send-message", post(send_message))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/status", get(status))
        .merge(protected)
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<AdminState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<impl IntoResponse, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if state.token.is_empty() || token != state.token {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

async fn status(State(state): State<AdminState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": state.lifecycle.status().await.as_str(),
        "pairing_code": state.lifecycle.pairing_challenge().await,
        "session_id": state.lifecycle.session_id().await,
    }))
}

async fn start_session(State(state): State<AdminState>) -> impl IntoResponse {
    match state.lifecycle.start().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "starting session" })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct LogoutRequest {
    secret: String,
}

async fn logout(
    State(state): State<AdminState>,
    Json(body): Json<LogoutRequest>,
) -> impl IntoResponse {
    if state.logout_secret.is_empty() || body.secret != state.logout_secret {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "invalid logout secret" })),
        );
    }
    match state.lifecycle.logout().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct SwitchRequest {
    session_id: String,
}

async fn switch_session(
    State(state): State<AdminState>,
    Json(body): Json<SwitchRequest>,
) -> impl IntoResponse {
    match state.lifecycle.switch_session(&body.session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "session_id": body.session_id })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
    }
}

async fn sessions(State(state): State<AdminState>) -> impl IntoResponse {
    match state.lifecycle.list_known_sessions().await {
        Ok(ids) => (StatusCode::OK, Json(json!({ "sessions": ids }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": e.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct ResetRequest {
    #[serde(default)]
    session_id: Option<String>,
}

async fn reset_session(
    State(state): State<AdminState>,
    Json(body): Json<ResetRequest>,
) -> impl IntoResponse {
    match state.lifecycle.reset_session(body.session_id.as_deref()).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct SendRequest {
    destination: String,
    text: String,
}

async fn send_message(
    State(state): State<AdminState>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    match state.lifecycle.send(&body.destination, &body.text).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
    }
}
