//! API routes for aulad

use crate::ingest;
use crate::schema::SchemaProvider;
use crate::server::AppState;
use aula_common::{
    AnswerSystem, ChatRequest, ChatResponse, ComponentHealth, IngestResponse, StatusResponse,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

// ============================================================================
// Chat Routes
// ============================================================================

pub fn chat_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/chat", post(chat))
}

async fn chat(
    State(state): State<AppStateArc>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is empty".to_string()));
    }

    info!("  Chat question received");
    let response = state
        .engine
        .answer(&req.message, req.session_id, req.user)
        .await;
    Ok(Json(response))
}

// ============================================================================
// Status Routes
// ============================================================================

pub fn status_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AppStateArc>) -> Json<StatusResponse> {
    let database = match state.db.ping().await {
        Ok(()) => ComponentHealth {
            available: true,
            error: None,
        },
        Err(e) => ComponentHealth {
            available: false,
            error: Some(e.to_string()),
        },
    };

    let llm = state.engine.llm().clone();
    let model_available = tokio::task::spawn_blocking(move || llm.is_available())
        .await
        .unwrap_or(false);
    let language_model = ComponentHealth {
        available: model_available,
        error: if model_available {
            None
        } else {
            Some("model endpoint unreachable".to_string())
        },
    };

    // Both paths need the model; the SQL path additionally needs live
    // introspection, so a failing database probe downgrades to the vector
    // system's optimistic "degraded" rather than a hard unhealthy
    let (status, serving) = match (database.available, language_model.available) {
        (true, true) => ("healthy", AnswerSystem::Sql),
        (false, true) => ("degraded", AnswerSystem::Vector),
        _ => ("unhealthy", AnswerSystem::Error),
    };

    Json(StatusResponse {
        status: status.to_string(),
        database,
        language_model,
        serving,
    })
}

// ============================================================================
// Admin Routes
// ============================================================================

pub fn admin_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/schema/refresh", post(refresh_schema))
        .route("/v1/admin/ingest", post(run_ingest))
}

async fn refresh_schema(
    State(state): State<AppStateArc>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    info!("  Forced schema refresh requested");
    state.schema.schema_text(true).await.map_err(|e| {
        error!("  Schema refresh failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(serde_json::json!({ "status": "refreshed" })))
}

async fn run_ingest(
    State(state): State<AppStateArc>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    info!("  Ingestion run requested");
    let stats = ingest::run(
        &state.db,
        state.chunk_store.as_ref(),
        state.engine.llm().clone(),
        &state.config.llm.embed_model,
    )
    .await
    .map_err(|e| {
        error!("  Ingestion failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(IngestResponse {
        inserted: stats.inserted,
        skipped: stats.skipped,
    }))
}
