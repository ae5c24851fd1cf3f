//! Chunk ingestion: relational rows to embedded evidence chunks.
//!
//! Operationally an offline job, exposed through an admin route. Each chunk
//! family reads one of the domain tables, renders a one-fact text with
//! metadata, embeds it, and inserts it idempotently: a chunk whose
//! (text, source) pair already exists is skipped.

use crate::db::{row_to_json, Database, ResultRow};
use crate::retriever::{normalize, ChunkSink};
use aula_common::{AssistantError, LlmClient};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// A chunk ready to embed and insert
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub text: String,
    pub metadata: Value,
}

/// Outcome of one ingestion run
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub inserted: usize,
    pub skipped: usize,
}

/// Render a JSON scalar for prose without quoting strings.
fn scalar(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn weight_pct(row: &ResultRow) -> String {
    let weight = row.get("weight").and_then(|v| v.as_f64()).unwrap_or(0.0);
    format!("{:.1}", weight * 100.0)
}

/// One assessment result as prose.
pub fn assessment_chunk(row: &ResultRow) -> ChunkDraft {
    let text = format!(
        "{} scored {} out of {} in \"{}\" ({}% weighting) for the \"{}\" unit of the \"{}\" bootcamp, due on {}.",
        scalar(row.get("full_name")),
        scalar(row.get("score")),
        scalar(row.get("max_score")),
        scalar(row.get("assessment_title")),
        weight_pct(row),
        scalar(row.get("unit_title")),
        scalar(row.get("bootcamp_name")),
        scalar(row.get("due_date")),
    );

    let mut metadata = row.clone();
    metadata.insert("source".to_string(), json!("assessment_result"));
    ChunkDraft {
        text,
        metadata: Value::Object(metadata),
    }
}

/// One daily attendance record as prose.
pub fn attendance_chunk(row: &ResultRow) -> ChunkDraft {
    let text = format!(
        "{} was {} on {} during the \"{}\" unit of the \"{}\" bootcamp.",
        scalar(row.get("full_name")),
        scalar(row.get("status")),
        scalar(row.get("date")),
        scalar(row.get("unit_title")),
        scalar(row.get("bootcamp_name")),
    );

    let mut metadata = row.clone();
    metadata.insert("source".to_string(), json!("daily_attendance"));
    ChunkDraft {
        text,
        metadata: Value::Object(metadata),
    }
}

/// One classroom metrics session as prose.
pub fn classroom_metrics_chunk(row: &ResultRow) -> ChunkDraft {
    let text = format!(
        "On {}, {} from {} to {}: average attendance {}%, average attention rate {}%, average distraction rate {}%.",
        scalar(row.get("day_of_week")),
        scalar(row.get("date")),
        scalar(row.get("start_time")),
        scalar(row.get("end_time")),
        scalar(row.get("attendance_pct")),
        scalar(row.get("avg_attention_rate")),
        scalar(row.get("avg_distraction_rate")),
    );

    let mut metadata = row.clone();
    metadata.insert("source".to_string(), json!("classroom_metrics"));
    ChunkDraft {
        text,
        metadata: Value::Object(metadata),
    }
}

async fn fetch_chunks(
    db: &Database,
    sql: &str,
    build: fn(&ResultRow) -> ChunkDraft,
) -> Result<Vec<ChunkDraft>, AssistantError> {
    let conn = db
        .acquire()
        .await
        .map_err(|e| AssistantError::Retrieval(e.to_string()))?;
    let rows = conn
        .client
        .query(sql, &[])
        .await
        .map_err(|e| AssistantError::Retrieval(e.to_string()))?;
    Ok(rows.iter().map(|r| build(&row_to_json(r))).collect())
}

/// Generate all chunk drafts from the domain tables.
pub async fn generate_chunks(db: &Database) -> Result<Vec<ChunkDraft>, AssistantError> {
    let mut chunks = fetch_chunks(
        db,
        "SELECT s.full_name, b.bootcamp_name, u.unit_title,
                a.assessment_title, g.score, a.max_score, a.weight, a.due_date
         FROM grades g
         JOIN assessments a ON g.assessment_id = a.assessment_id
         JOIN units u ON a.unit_id = u.unit_id
         JOIN students s ON g.student_id = s.student_id
         JOIN bootcamps b ON s.bootcamp_id = b.bootcamp_id
         ORDER BY s.student_id, a.due_date",
        assessment_chunk,
    )
    .await?;

    chunks.extend(
        fetch_chunks(
            db,
            "SELECT s.full_name, b.bootcamp_name, u.unit_title, a.status, a.date
             FROM attendance a
             JOIN students s ON a.student_id = s.student_id
             JOIN units u ON a.unit_id = u.unit_id
             JOIN bootcamps b ON s.bootcamp_id = b.bootcamp_id
             ORDER BY s.student_id, a.date",
            attendance_chunk,
        )
        .await?,
    );

    chunks.extend(
        fetch_chunks(
            db,
            "SELECT date, day_of_week, start_time, end_time,
                    attendance_pct, avg_attention_rate, avg_distraction_rate
             FROM classroom_metrics
             ORDER BY date, start_time",
            classroom_metrics_chunk,
        )
        .await?,
    );

    Ok(chunks)
}

/// Run one full ingestion pass: generate, embed, insert-or-skip.
pub async fn run(
    db: &Database,
    store: &dyn ChunkSink,
    llm: Arc<dyn LlmClient>,
    embed_model: &str,
) -> Result<IngestStats, AssistantError> {
    let chunks = generate_chunks(db).await?;
    info!(total = chunks.len(), "generated chunk drafts");
    ingest_chunks(chunks, store, llm, embed_model).await
}

/// Embed each draft and insert it idempotently: duplicates by
/// (text, source) are skipped before any embedding call is spent on them.
pub async fn ingest_chunks(
    chunks: Vec<ChunkDraft>,
    store: &dyn ChunkSink,
    llm: Arc<dyn LlmClient>,
    embed_model: &str,
) -> Result<IngestStats, AssistantError> {
    let mut stats = IngestStats::default();
    for chunk in chunks {
        let source = chunk
            .metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        // Skip before embedding; duplicates cost no model call
        if store.exists(&chunk.text, &source).await? {
            stats.skipped += 1;
            continue;
        }

        let llm = llm.clone();
        let model = embed_model.to_string();
        let text = chunk.text.clone();
        let raw = tokio::task::spawn_blocking(move || llm.embed(&model, &text))
            .await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;

        let embedding = match normalize(raw) {
            Some(v) => v,
            None => {
                warn!("zero-norm embedding for chunk, skipping");
                stats.skipped += 1;
                continue;
            }
        };

        if store.insert(&chunk.text, &chunk.metadata, &embedding).await? {
            stats.inserted += 1;
        } else {
            stats.skipped += 1;
        }
    }

    info!(
        inserted = stats.inserted,
        skipped = stats.skipped,
        "ingestion run complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessment_row() -> ResultRow {
        let mut row = ResultRow::new();
        row.insert("full_name".to_string(), json!("Salma Hasan"));
        row.insert("bootcamp_name".to_string(), json!("Data Science"));
        row.insert("unit_title".to_string(), json!("Deep Learning"));
        row.insert("assessment_title".to_string(), json!("Final Project"));
        row.insert("score".to_string(), json!(92));
        row.insert("max_score".to_string(), json!(100));
        row.insert("weight".to_string(), json!(0.25));
        row.insert("due_date".to_string(), json!("2025-06-01"));
        row
    }

    #[test]
    fn test_assessment_chunk_text() {
        let chunk = assessment_chunk(&assessment_row());
        assert_eq!(
            chunk.text,
            "Salma Hasan scored 92 out of 100 in \"Final Project\" (25.0% weighting) for the \"Deep Learning\" unit of the \"Data Science\" bootcamp, due on 2025-06-01."
        );
        assert_eq!(chunk.metadata["source"], "assessment_result");
        assert_eq!(chunk.metadata["full_name"], "Salma Hasan");
    }

    #[test]
    fn test_attendance_chunk_text() {
        let mut row = ResultRow::new();
        row.insert("full_name".to_string(), json!("Omar Said"));
        row.insert("bootcamp_name".to_string(), json!("Data Science"));
        row.insert("unit_title".to_string(), json!("Python Programming"));
        row.insert("status".to_string(), json!("absent"));
        row.insert("date".to_string(), json!("2025-03-14"));

        let chunk = attendance_chunk(&row);
        assert_eq!(
            chunk.text,
            "Omar Said was absent on 2025-03-14 during the \"Python Programming\" unit of the \"Data Science\" bootcamp."
        );
        assert_eq!(chunk.metadata["source"], "daily_attendance");
    }

    #[test]
    fn test_classroom_metrics_chunk_text() {
        let mut row = ResultRow::new();
        row.insert("date".to_string(), json!("2025-04-02"));
        row.insert("day_of_week".to_string(), json!("Wednesday"));
        row.insert("start_time".to_string(), json!("09:00:00"));
        row.insert("end_time".to_string(), json!("12:00:00"));
        row.insert("attendance_pct".to_string(), json!(87.0));
        row.insert("avg_attention_rate".to_string(), json!(74.0));
        row.insert("avg_distraction_rate".to_string(), json!(12.0));

        let chunk = classroom_metrics_chunk(&row);
        assert!(chunk.text.starts_with("On Wednesday, 2025-04-02 from 09:00:00 to 12:00:00"));
        assert!(chunk.text.contains("average attendance 87"));
        assert_eq!(chunk.metadata["source"], "classroom_metrics");
    }

    #[test]
    fn test_scalar_strips_string_quotes() {
        assert_eq!(scalar(Some(&json!("text"))), "text");
        assert_eq!(scalar(Some(&json!(42))), "42");
        assert_eq!(scalar(Some(&Value::Null)), "");
        assert_eq!(scalar(None), "");
    }

    use async_trait::async_trait;
    use aula_common::FakeLlmClient;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSink {
        stored: Mutex<HashSet<(String, String)>>,
    }

    #[async_trait]
    impl ChunkSink for FakeSink {
        async fn exists(&self, text: &str, source: &str) -> Result<bool, AssistantError> {
            Ok(self
                .stored
                .lock()
                .unwrap()
                .contains(&(text.to_string(), source.to_string())))
        }

        async fn insert(
            &self,
            text: &str,
            metadata: &Value,
            _embedding: &[f32],
        ) -> Result<bool, AssistantError> {
            let source = metadata
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Ok(self
                .stored
                .lock()
                .unwrap()
                .insert((text.to_string(), source)))
        }
    }

    fn draft(text: &str, source: &str) -> ChunkDraft {
        ChunkDraft {
            text: text.to_string(),
            metadata: json!({ "source": source }),
        }
    }

    #[tokio::test]
    async fn test_ingestion_skips_duplicates_within_a_run() {
        let sink = FakeSink::default();
        let llm = Arc::new(FakeLlmClient::always("x").with_embeddings(vec![Ok(vec![1.0, 0.0])]));

        let drafts = vec![
            draft("Salma scored 92.", "assessment_result"),
            draft("Salma scored 92.", "assessment_result"),
            draft("Omar was absent.", "daily_attendance"),
        ];

        let stats = ingest_chunks(drafts, &sink, llm, "embed-model").await.unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(sink.stored.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingestion_is_idempotent_across_runs() {
        let sink = FakeSink::default();
        let llm = Arc::new(FakeLlmClient::always("x").with_embeddings(vec![Ok(vec![1.0, 0.0])]));

        let drafts = vec![draft("Salma scored 92.", "assessment_result")];
        let first = ingest_chunks(drafts.clone(), &sink, llm.clone(), "embed-model")
            .await
            .unwrap();
        assert_eq!(first.inserted, 1);

        // Same chunks again: every insert is a no-op skip
        let second = ingest_chunks(drafts, &sink, llm.clone(), "embed-model")
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(sink.stored.lock().unwrap().len(), 1);

        // The duplicate never reached the embedding model
        assert_eq!(llm.embed_count(), 1);
    }

    #[tokio::test]
    async fn test_same_text_different_source_both_stored() {
        let sink = FakeSink::default();
        let llm = Arc::new(FakeLlmClient::always("x").with_embeddings(vec![Ok(vec![1.0, 0.0])]));

        let drafts = vec![
            draft("March 14 session.", "daily_attendance"),
            draft("March 14 session.", "classroom_metrics"),
        ];

        let stats = ingest_chunks(drafts, &sink, llm, "embed-model").await.unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 0);
    }
}
