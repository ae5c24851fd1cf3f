//! SQL synthesis from natural-language questions.
//!
//! The language model is given the schema snapshot and constrained to emit
//! exactly one read-only SELECT. Its output is untrusted text: it leaves
//! this module as a CandidateQuery and must pass the sanitizer before any
//! executor will touch it.

use aula_common::{AssistantError, LlmClient};
use once_cell::sync::Lazy;
use regex::Regex;

/// A synthesized, not-yet-validated query
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    text: String,
}

impl CandidateQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// System instruction for the SQL-writer model
pub const SQL_WRITER_SYSTEM_PROMPT: &str = "You are a careful SQL writer.
- Output ONLY a single SQL statement that answers the user's question.
- Use ANSI SQL compatible with PostgreSQL.
- It must be a single SELECT query (no DDL/DML, no CTEs that modify data).
- Prefer JOINs using the schema; avoid guessing column names that don't exist.
- Use ILIKE with wildcards for fuzzy text (e.g., ILIKE '%' || term || '%') when helpful.
- Always include an ORDER BY where relevant and a LIMIT (<= 100) to cap rows.
- Do not wrap the SQL in code fences or add commentary.
- If multiple rows tie for the same top score / value / result, return all of them.
- When asked for average attendance, give percentages.";

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^```(?:sql)?[ \t]*|```[ \t]*$").expect("valid regex"));

/// Strip incidental code-fence wrapping the model sometimes adds.
fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text.trim(), "").trim().to_string()
}

/// Synthesize a candidate query for the question against the schema.
///
/// With `error_feedback` set, the prompt carries the previous execution
/// error and demands a revised statement; this is the orchestrator's single
/// retry hook. Blocking: callers dispatch via `spawn_blocking`.
pub fn synthesize(
    llm: &dyn LlmClient,
    model: &str,
    question: &str,
    schema_text: &str,
    error_feedback: Option<&str>,
) -> Result<CandidateQuery, AssistantError> {
    let user_prompt = match error_feedback {
        None => format!("Schema:\n{}\n\nQuestion:\n{}", schema_text, question),
        Some(err) => format!(
            "Schema:\n{}\n\nQuestion:\n{}\n\nThe previous SQL failed with error:\n{}\n\nRevise and return ONLY a safe single SELECT with LIMIT.",
            schema_text, question, err
        ),
    };

    let raw = llm
        .chat(model, SQL_WRITER_SYSTEM_PROMPT, &user_prompt)
        .map_err(|e| AssistantError::Synthesis(e.to_string()))?;

    let sql = strip_code_fences(&raw);
    if sql.is_empty() {
        return Err(AssistantError::Synthesis(
            "model returned no statement".to_string(),
        ));
    }

    Ok(CandidateQuery::new(sql))
}
