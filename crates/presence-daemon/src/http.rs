//! HTTP JSON API.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use presence_core::{Identity, IdentityGenerator};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{DaemonError, Result};
use crate::service::{
    HeartbeatRequest, HeartbeatResponse, LogoutRequest, LogoutResponse, PresenceService,
    PresenceSnapshot, PresenceStats,
};

pub const SERVICE_NAME: &str = "presence";

const DEFAULT_SUGGESTIONS: usize = 5;
const MAX_SUGGESTIONS: usize = 20;

/// Build the router with all routes.
pub fn router(service: Arc<PresenceService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/users/heartbeat", post(heartbeat))
        .route("/api/v1/presence/logout", post(logout))
        .route("/api/v1/presence", get(presence))
        .route("/api/v1/identity/generate", get(generate_identity))
        .route("/api/v1/identity/suggestions", get(suggestions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve `router` on a pre-bound listener until `cancel` fires.
pub async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "http server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("http server stopped");
    Ok(())
}

// ============================================================================
// Presence
// ============================================================================

async fn heartbeat(
    State(service): State<Arc<PresenceService>>,
    payload: std::result::Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>> {
    let Json(req) = payload.map_err(|e| DaemonError::Validation(e.body_text()))?;
    Ok(Json(service.heartbeat(req)?))
}

/// Always 200 for a well-formed request, whether or not the user was online.
async fn logout(
    State(service): State<Arc<PresenceService>>,
    payload: std::result::Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<LogoutResponse>> {
    let Json(req) = payload.map_err(|e| DaemonError::Validation(e.body_text()))?;
    Ok(Json(service.logout(req)?))
}

async fn presence(State(service): State<Arc<PresenceService>>) -> Json<PresenceSnapshot> {
    Json(service.get_presence())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    stats: PresenceStats,
}

async fn health(State(service): State<Arc<PresenceService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: SERVICE_NAME,
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        stats: service.stats(),
    })
}

// ============================================================================
// Identity
// ============================================================================

/// Offline identity issuance; does not register presence.
async fn generate_identity() -> Json<Identity> {
    Json(IdentityGenerator::new().generate())
}

#[derive(Debug, Deserialize)]
struct SuggestionParams {
    count: Option<usize>,
    base: Option<String>,
}

#[derive(Debug, Serialize)]
struct SuggestionResponse {
    suggestions: Vec<String>,
}

async fn suggestions(
    params: std::result::Result<Query<SuggestionParams>, QueryRejection>,
) -> Result<Json<SuggestionResponse>> {
    let Query(params) = params.map_err(|e| DaemonError::Validation(e.body_text()))?;
    let count = params.count.unwrap_or(DEFAULT_SUGGESTIONS).min(MAX_SUGGESTIONS);
    let mut generator = IdentityGenerator::new();
    let suggestions = match params.base.as_deref().map(str::trim) {
        Some(base) if !base.is_empty() => generator.suggest_usernames_for(base, count),
        _ => generator.suggest_usernames(count),
    };
    Ok(Json(SuggestionResponse { suggestions }))
}

// ============================================================================
// Tests
// ============================================================================
