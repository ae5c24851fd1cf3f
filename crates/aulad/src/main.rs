//! Aula Daemon - classroom question-answering service.
//!
//! Answers natural-language questions about classroom data over HTTP,
//! grounded in read-only database queries with a vector-retrieval fallback.

use anyhow::Result;
use aula_common::{AulaConfig, CONFIG_PATH};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Aula Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("AULA_CONFIG").unwrap_or_else(|_| CONFIG_PATH.to_string());
    let config = AulaConfig::load(Path::new(&config_path))?;

    let state = aulad::server::AppState::new(config)?;
    info!("Aula Daemon ready");

    aulad::server::run(state).await
}
