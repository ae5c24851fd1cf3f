//! HTTP server for aulad

use crate::db::Database;
use crate::engine::Engine;
use crate::executor::PgExecutor;
use crate::retriever::ChunkStore;
use crate::routes;
use crate::schema::PgSchemaProvider;
use anyhow::Result;
use aula_common::{AulaConfig, HttpLlmClient, LlmClient, SessionStore};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub config: AulaConfig,
    pub db: Arc<Database>,
    pub engine: Arc<Engine>,
    pub schema: Arc<PgSchemaProvider>,
    pub chunk_store: Arc<ChunkStore>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the engine and its collaborators from configuration.
    pub fn new(config: AulaConfig) -> Result<Self> {
        let db = Arc::new(Database::new(config.database.clone()));
        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(config.llm.clone())?);

        let schema = Arc::new(PgSchemaProvider::new(db.clone(), config.database.clone()));
        let executor = Arc::new(PgExecutor::new(
            db.clone(),
            config.database.statement_timeout_ms,
        ));
        let chunk_store = Arc::new(ChunkStore::new(
            db.clone(),
            config.database.chunk_table.clone(),
        ));
        let sessions = Arc::new(SessionStore::new());

        let engine = Arc::new(Engine::new(
            llm,
            schema.clone(),
            executor,
            chunk_store.clone(),
            sessions,
            config.llm.clone(),
            config.retrieval.clone(),
        ));

        Ok(Self {
            config,
            db,
            engine,
            schema,
            chunk_store,
            start_time: Instant::now(),
        })
    }
}

/// Run the HTTP server
pub async fn run(state: AppState) -> Result<()> {
    let addr = state.config.server.bind_addr.clone();
    let state = Arc::new(state);

    let app = Router::new()
        .merge(routes::chat_routes())
        .merge(routes::status_routes())
        .merge(routes::admin_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
