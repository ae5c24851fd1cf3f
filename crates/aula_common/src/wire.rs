//! Wire types for the daemon HTTP API, shared with the CLI client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which answering system produced the final response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSystem {
    /// SQL synthesis path (primary)
    Sql,
    /// Vector retrieval path (fallback)
    Vector,
    /// Terminal apology; no system could answer
    Error,
}

impl std::fmt::Display for AnswerSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerSystem::Sql => write!(f, "sql"),
            AnswerSystem::Vector => write!(f, "vector"),
            AnswerSystem::Error => write!(f, "error"),
        }
    }
}

/// Chat request: one user message, optionally continuing a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub user: Option<String>,
}

/// One evidence source backing an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub content: String,
    pub metadata: Value,
}

/// Chat response with the answer and its provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: Uuid,
    pub sources: Vec<SourceInfo>,
    pub system_used: AnswerSystem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Health of one dependency of the answering pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service status: per-path health plus which system is currently serving
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// "healthy", "degraded" (serving from fallback), or "unhealthy"
    pub status: String,
    pub database: ComponentHealth,
    pub language_model: ComponentHealth,
    pub serving: AnswerSystem,
}

/// Result of an ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub inserted: usize,
    pub skipped: usize,
}
