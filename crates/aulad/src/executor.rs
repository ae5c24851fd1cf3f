//! Read-only query execution.
//!
//! Runs a validated statement inside a read-only transaction with a short
//! statement timeout, so even a statement that slipped past the validator
//! can neither mutate state nor hang the connection.

use crate::db::{row_to_json, Database, ResultRow};
use crate::sanitize::ValidatedQuery;
use async_trait::async_trait;
use aula_common::AssistantError;
use std::sync::Arc;
use tracing::debug;

/// Executor seam; the engine depends on this, not on PostgreSQL.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a validated query and return its rows. Zero matching rows is an
    /// empty ResultSet, not an error.
    async fn run(&self, query: &ValidatedQuery) -> Result<Vec<ResultRow>, AssistantError>;
}

/// PostgreSQL executor
pub struct PgExecutor {
    db: Arc<Database>,
    statement_timeout_ms: u64,
}

impl PgExecutor {
    pub fn new(db: Arc<Database>, statement_timeout_ms: u64) -> Self {
        Self {
            db,
            statement_timeout_ms,
        }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn run(&self, query: &ValidatedQuery) -> Result<Vec<ResultRow>, AssistantError> {
        let conn = self
            .db
            .acquire()
            .await
            .map_err(|e| AssistantError::Execution(e.to_string()))?;
        let client = &conn.client;

        client
            .batch_execute("BEGIN READ ONLY")
            .await
            .map_err(|e| AssistantError::Execution(e.to_string()))?;

        // SET LOCAL scopes the timeout to this transaction only
        let set_timeout = format!("SET LOCAL statement_timeout = {}", self.statement_timeout_ms);
        if let Err(e) = client.batch_execute(&set_timeout).await {
            let _ = client.batch_execute("ROLLBACK").await;
            return Err(AssistantError::Execution(e.to_string()));
        }

        let rows = match client.query(query.as_sql(), &[]).await {
            Ok(rows) => rows,
            Err(e) => {
                let _ = client.batch_execute("ROLLBACK").await;
                return Err(AssistantError::Execution(e.to_string()));
            }
        };

        // Nothing to write back; commit ends the no-op transaction
        client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| AssistantError::Execution(e.to_string()))?;

        debug!(rows = rows.len(), "read-only query completed");
        Ok(rows.iter().map(row_to_json).collect())
    }
}
