//! Evidence retrieval over precomputed text chunks.
//!
//! The alternate answering path: the question is embedded with the same
//! model used at ingestion, normalized to unit length, and matched against
//! the chunk table by nearest-neighbor ordering on the embedding column
//! (inner product on normalized vectors, equivalent to cosine similarity).

use crate::db::Database;
use async_trait::async_trait;
use aula_common::AssistantError;
use serde_json::Value;
use std::sync::Arc;

/// One stored evidence chunk
#[derive(Debug, Clone)]
pub struct EvidenceChunk {
    pub text: String,
    pub metadata: Value,
}

/// Normalize an embedding to unit length.
///
/// Returns None for the degenerate zero vector (empty text embeds to zero
/// with some models); similarity ranking is undefined there and callers
/// must treat it as "no evidence".
pub fn normalize(vec: Vec<f32>) -> Option<Vec<f32>> {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return None;
    }
    Some(vec.into_iter().map(|v| v / norm).collect())
}

/// Inner product of two vectors; cosine similarity when both are unit-norm.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Render an embedding as a pgvector literal, e.g. `[0.1,0.2,0.3]`.
pub fn vector_literal(vec: &[f32]) -> String {
    let mut out = String::with_capacity(vec.len() * 10 + 2);
    out.push('[');
    for (i, v) in vec.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

/// Retrieval seam; the engine depends on this, not on the chunk table.
#[async_trait]
pub trait ChunkSearcher: Send + Sync {
    /// Top-k chunks by similarity to a unit-normalized question embedding.
    async fn top_k(&self, embedding: &[f32], k: usize)
        -> Result<Vec<EvidenceChunk>, AssistantError>;
}

/// Ingestion seam over the chunk store.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Whether a chunk with this (text, source) pair is already stored.
    async fn exists(&self, text: &str, source: &str) -> Result<bool, AssistantError>;

    /// Insert a chunk unless an identical (text, source) chunk exists.
    /// Returns true when inserted, false when skipped.
    async fn insert(
        &self,
        text: &str,
        metadata: &Value,
        embedding: &[f32],
    ) -> Result<bool, AssistantError>;
}

/// Chunk store backed by a pgvector table
pub struct ChunkStore {
    db: Arc<Database>,
    table: String,
}

impl ChunkStore {
    pub fn new(db: Arc<Database>, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ChunkSink for ChunkStore {
    async fn exists(&self, text: &str, source: &str) -> Result<bool, AssistantError> {
        let conn = self
            .db
            .acquire()
            .await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;

        let sql = format!(
            "SELECT 1 FROM {} WHERE chunk_text = $1 AND metadata->>'source' = $2 LIMIT 1",
            self.table
        );
        let rows = conn
            .client
            .query(&sql, &[&text, &source])
            .await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;
        Ok(!rows.is_empty())
    }

    async fn insert(
        &self,
        text: &str,
        metadata: &Value,
        embedding: &[f32],
    ) -> Result<bool, AssistantError> {
        let source = metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if self.exists(text, &source).await? {
            return Ok(false);
        }

        let conn = self
            .db
            .acquire()
            .await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;

        let sql = format!(
            "INSERT INTO {} (chunk_text, embedding, metadata) VALUES ($1, $2::vector, $3)",
            self.table
        );
        conn.client
            .execute(&sql, &[&text, &vector_literal(embedding), metadata])
            .await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;
        Ok(true)
    }
}

#[async_trait]
impl ChunkSearcher for ChunkStore {
    async fn top_k(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<EvidenceChunk>, AssistantError> {
        let conn = self
            .db
            .acquire()
            .await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;

        let sql = format!(
            "SELECT chunk_text, metadata FROM {} ORDER BY embedding <#> $1::vector LIMIT $2",
            self.table
        );
        let rows = conn
            .client
            .query(&sql, &[&vector_literal(embedding), &(k as i64)])
            .await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| EvidenceChunk {
                text: r.get(0),
                metadata: r.get(1),
            })
            .collect())
    }
}
