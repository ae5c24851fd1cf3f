//! Schema snapshotting for query synthesis.
//!
//! Introspects the allow-listed domain tables (columns, foreign keys, sample
//! rows) into an immutable snapshot the synthesizer prompt is grounded on.
//! The snapshot is cached process-wide and regenerated wholesale on explicit
//! refresh; introspection failures never leave a partial snapshot behind.

use crate::db::{row_to_json, Database, ResultRow};
use async_trait::async_trait;
use aula_common::{AssistantError, DatabaseConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One column definition
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// One foreign-key relationship
#[derive(Debug, Clone, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Everything captured about one table
#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
    pub sample_rows: Vec<ResultRow>,
}

/// Immutable snapshot of the queryable schema
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableInfo>,
    pub captured_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    /// Render the textual form the synthesizer prompt embeds.
    pub fn to_prompt_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let col_str = table
                .columns
                .iter()
                .map(|c| {
                    if c.nullable {
                        format!("{} {} NULL", c.name, c.data_type)
                    } else {
                        format!("{} {}", c.name, c.data_type)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");

            let fk_str = if table.foreign_keys.is_empty() {
                "None".to_string()
            } else {
                table
                    .foreign_keys
                    .iter()
                    .map(|fk| {
                        format!(
                            "{} -> {}.{}",
                            fk.column, fk.references_table, fk.references_column
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            };

            let samples = serde_json::to_string(&table.sample_rows).unwrap_or_default();

            parts.push(format!(
                "TABLE {}\n  COLUMNS: {}\n  FKs: {}\n  SAMPLES: {}",
                table.name, col_str, fk_str, samples
            ));
        }
        parts.join("\n\n")
    }
}

/// Process-wide snapshot cache with replace-whole-value semantics.
#[derive(Default)]
pub struct SchemaCache {
    slot: RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached snapshot, if any. No I/O.
    pub async fn cached(&self) -> Option<Arc<SchemaSnapshot>> {
        self.slot.read().await.clone()
    }

    /// Return the cached snapshot, introspecting on miss or forced refresh.
    pub async fn get(
        &self,
        db: &Database,
        config: &DatabaseConfig,
        force_refresh: bool,
    ) -> Result<Arc<SchemaSnapshot>, AssistantError> {
        if !force_refresh {
            if let Some(snapshot) = self.cached().await {
                return Ok(snapshot);
            }
        }

        let snapshot = Arc::new(introspect(db, config).await?);
        *self.slot.write().await = Some(snapshot.clone());
        info!(
            tables = snapshot.tables.len(),
            "schema snapshot refreshed"
        );
        Ok(snapshot)
    }
}

/// Schema seam; the engine depends on this, not on PostgreSQL.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Textual schema snapshot for the synthesizer prompt.
    async fn schema_text(&self, force_refresh: bool) -> Result<String, AssistantError>;
}

/// Cache-backed provider over the live database
pub struct PgSchemaProvider {
    db: Arc<Database>,
    config: DatabaseConfig,
    cache: SchemaCache,
}

impl PgSchemaProvider {
    pub fn new(db: Arc<Database>, config: DatabaseConfig) -> Self {
        Self {
            db,
            config,
            cache: SchemaCache::new(),
        }
    }
}

#[async_trait]
impl SchemaProvider for PgSchemaProvider {
    async fn schema_text(&self, force_refresh: bool) -> Result<String, AssistantError> {
        let snapshot = self.cache.get(&self.db, &self.config, force_refresh).await?;
        Ok(snapshot.to_prompt_text())
    }
}

/// Introspect the allow-listed tables into a fresh snapshot.
async fn introspect(
    db: &Database,
    config: &DatabaseConfig,
) -> Result<SchemaSnapshot, AssistantError> {
    let conn = db
        .acquire()
        .await
        .map_err(|e| AssistantError::SchemaIntrospection(e.to_string()))?;
    let client = &conn.client;

    let table_rows = client
        .query(
            "SELECT table_name::text
             FROM information_schema.tables
             WHERE table_schema = 'public' AND table_name = ANY($1)
             ORDER BY table_name",
            &[&config.allowed_tables],
        )
        .await
        .map_err(|e| AssistantError::SchemaIntrospection(e.to_string()))?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for table_row in &table_rows {
        let name: String = table_row.get(0);

        let column_rows = client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text
                 FROM information_schema.columns
                 WHERE table_schema = 'public' AND table_name = $1
                 ORDER BY ordinal_position",
                &[&name],
            )
            .await
            .map_err(|e| AssistantError::SchemaIntrospection(e.to_string()))?;

        let columns = column_rows
            .iter()
            .map(|r| ColumnInfo {
                name: r.get(0),
                data_type: r.get(1),
                nullable: r.get::<_, String>(2) == "YES",
            })
            .collect();

        let fk_rows = client
            .query(
                "SELECT kcu.column_name::text,
                        ccu.table_name::text AS fk_table,
                        ccu.column_name::text AS fk_column
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                  AND tc.table_schema = kcu.table_schema
                 JOIN information_schema.constraint_column_usage ccu
                   ON ccu.constraint_name = tc.constraint_name
                  AND ccu.table_schema = tc.table_schema
                 WHERE tc.table_schema = 'public'
                   AND tc.table_name = $1
                   AND tc.constraint_type = 'FOREIGN KEY'",
                &[&name],
            )
            .await
            .map_err(|e| AssistantError::SchemaIntrospection(e.to_string()))?;

        let foreign_keys = fk_rows
            .iter()
            .map(|r| ForeignKey {
                column: r.get(0),
                references_table: r.get(1),
                references_column: r.get(2),
            })
            .collect();

        // Table name comes from the allow-list, not from user input
        let sample_sql = format!(
            "SELECT * FROM \"{}\" LIMIT {}",
            name, config.sample_rows
        );
        let sample_rows = client
            .query(&sample_sql, &[])
            .await
            .map_err(|e| AssistantError::SchemaIntrospection(e.to_string()))?
            .iter()
            .map(row_to_json)
            .collect();

        tables.push(TableInfo {
            name,
            columns,
            foreign_keys,
            sample_rows,
        });
    }

    Ok(SchemaSnapshot {
        tables,
        captured_at: Utc::now(),
    })
}
