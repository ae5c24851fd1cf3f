//! Error taxonomy for the question-answering pipeline.
//!
//! Every stage failure is caught at the orchestrator boundary and converted
//! into a fallback transition; none of these ever reach an API caller raw.

use thiserror::Error;

/// Stage-level errors produced by the answering pipeline.
#[derive(Debug, Clone, Error)]
pub enum AssistantError {
    /// Schema introspection failed; nothing partial is cached.
    #[error("schema introspection failed: {0}")]
    SchemaIntrospection(String),

    /// The model call failed or returned unusable output.
    #[error("query synthesis failed: {0}")]
    Synthesis(String),

    /// The validator rejected a candidate query. The candidate never executes.
    #[error("unsafe query rejected: {0}")]
    UnsafeQuery(String),

    /// Database-level failure while executing a validated query.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// The vector retrieval path itself failed. Terminal.
    #[error("evidence retrieval failed: {0}")]
    Retrieval(String),
}

impl AssistantError {
    /// Short stage label for logs and degradation reasons.
    pub fn stage(&self) -> &'static str {
        match self {
            AssistantError::SchemaIntrospection(_) => "schema",
            AssistantError::Synthesis(_) => "synthesis",
            AssistantError::UnsafeQuery(_) => "validation",
            AssistantError::Execution(_) => "execution",
            AssistantError::Retrieval(_) => "retrieval",
        }
    }
}
