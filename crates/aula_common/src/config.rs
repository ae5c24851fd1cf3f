//! Configuration management for the Aula assistant.
//!
//! Loads settings from /etc/aula/config.toml or uses defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/aula/config.toml";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the daemon API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    // Localhost only; the daemon has no auth layer of its own
    "127.0.0.1:7890".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Upper bound on concurrently held connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Statement timeout applied inside every read-only transaction
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    /// Tables the assistant is allowed to see and query
    #[serde(default = "default_allowed_tables")]
    pub allowed_tables: Vec<String>,

    /// Sample rows captured per table in the schema snapshot
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Table holding precomputed evidence chunks
    #[serde(default = "default_chunk_table")]
    pub chunk_table: String,
}

fn default_database_url() -> String {
    "host=127.0.0.1 user=aula dbname=aula".to_string()
}

fn default_max_connections() -> usize {
    8
}

fn default_statement_timeout_ms() -> u64 {
    5_000
}

fn default_allowed_tables() -> Vec<String> {
    [
        "students",
        "bootcamps",
        "units",
        "assessments",
        "grades",
        "attendance",
        "classroom_metrics",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sample_rows() -> usize {
    10
}

fn default_chunk_table() -> String {
    "rag_chunks".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            statement_timeout_ms: default_statement_timeout_ms(),
            allowed_tables: default_allowed_tables(),
            sample_rows: default_sample_rows(),
            chunk_table: default_chunk_table(),
        }
    }
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Endpoint base URL (Ollama or OpenAI-compatible)
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key for OpenAI-compatible endpoints
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used for SQL synthesis
    #[serde(default = "default_sql_model")]
    pub sql_model: String,

    /// Model used for final answer composition
    #[serde(default = "default_answer_model")]
    pub answer_model: String,

    /// Embedding model; must match the model used at chunk ingestion
    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Cap on concurrent in-flight model calls
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_sql_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_answer_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_concurrent_calls() -> usize {
    4
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            sql_model: default_sql_model(),
            answer_model: default_answer_model(),
            embed_model: default_embed_model(),
            timeout_secs: default_llm_timeout(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

/// Retrieval and fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks retrieved per question on the vector path
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Whether a failed SQL retry degrades to the vector path
    /// (false sends it straight to the terminal apology)
    #[serde(default = "default_fallback_to_vector")]
    pub fallback_to_vector: bool,
}

fn default_top_k() -> usize {
    50
}

fn default_fallback_to_vector() -> bool {
    true
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fallback_to_vector: default_fallback_to_vector(),
        }
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AulaConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl AulaConfig {
    /// Load configuration from the given path, falling back to defaults
    /// when the file is absent or unreadable.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: AulaConfig = toml::from_str(&content)?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            warn!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}
