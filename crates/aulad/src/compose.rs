//! Final answer composition.
//!
//! Merges the retrieved evidence and the bounded conversation window into a
//! single prompt and asks the model for a grounded answer. Empty evidence
//! never reaches the model: it short-circuits to a fixed message.

use crate::db::ResultRow;
use crate::retriever::EvidenceChunk;
use aula_common::{ConversationTurn, LlmClient, LlmError, RECENT_TURN_WINDOW};
use chrono::Utc;

/// Fixed message when a SQL result set is empty
pub const NO_ROWS_MESSAGE: &str = "No relevant data found. Please check that you entered the correct student name, bootcamp, or unit title.";

/// Fixed message when the chunk store yields nothing
pub const NO_CHUNKS_MESSAGE: &str = "No relevant information was found in the knowledge base.";

/// System instruction for the answer model
pub const ANALYST_SYSTEM_PROMPT: &str = "You are a precise analyst. Use only the provided evidence and recent conversation to answer succinctly. Always check whether the student has taken the unit or is enrolled in the bootcamp; do this check silently. Do not mention the SQL query or the calculations you did in your final output.";

/// Evidence backing one answer
#[derive(Debug, Clone)]
pub enum Evidence {
    Rows(Vec<ResultRow>),
    Chunks(Vec<EvidenceChunk>),
}

impl Evidence {
    pub fn is_empty(&self) -> bool {
        match self {
            Evidence::Rows(rows) => rows.is_empty(),
            Evidence::Chunks(chunks) => chunks.is_empty(),
        }
    }

    /// The fixed message for this evidence kind when nothing was found
    pub fn empty_message(&self) -> &'static str {
        match self {
            Evidence::Rows(_) => NO_ROWS_MESSAGE,
            Evidence::Chunks(_) => NO_CHUNKS_MESSAGE,
        }
    }

    fn render(&self) -> String {
        match self {
            Evidence::Rows(rows) => format!(
                "Evidence rows:\n{}",
                serde_json::to_string(rows).unwrap_or_default()
            ),
            Evidence::Chunks(chunks) => {
                let body = chunks
                    .iter()
                    .map(|c| format!("- {}", c.text))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                format!("Text chunks:\n{}", body)
            }
        }
    }
}

/// How an answer came to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposedAnswer {
    /// Model-composed from evidence; recorded in session memory
    Grounded(String),
    /// Fixed no-evidence message; the model was never invoked
    NoEvidence(String),
}

impl ComposedAnswer {
    pub fn text(&self) -> &str {
        match self {
            ComposedAnswer::Grounded(t) | ComposedAnswer::NoEvidence(t) => t,
        }
    }
}

/// Build the composition prompt: current date, recent turns, evidence.
pub fn build_prompt(question: &str, evidence: &Evidence, recent_turns: &[ConversationTurn]) -> String {
    let today = Utc::now().format("%Y-%m-%d");

    // The window bound holds here even if a caller hands us more
    let start = recent_turns.len().saturating_sub(RECENT_TURN_WINDOW);
    let recent_context = recent_turns[start..]
        .iter()
        .map(|t| format!("Q: {}\nA: {}", t.question, t.answer))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Today is {}. Use this date as reference for time-based questions.\n\n\
         Conversation so far:\n{}\n\n\
         {}\n\n\
         Current Question: {}",
        today,
        recent_context,
        evidence.render(),
        question
    )
}

/// Compose the final answer.
///
/// Empty evidence short-circuits to the fixed message without a model call.
/// Blocking: callers dispatch via `spawn_blocking`.
pub fn compose(
    llm: &dyn LlmClient,
    model: &str,
    question: &str,
    evidence: &Evidence,
    recent_turns: &[ConversationTurn],
) -> Result<ComposedAnswer, LlmError> {
    if evidence.is_empty() {
        return Ok(ComposedAnswer::NoEvidence(
            evidence.empty_message().to_string(),
        ));
    }

    let prompt = build_prompt(question, evidence, recent_turns);
    let answer = llm.chat(model, ANALYST_SYSTEM_PROMPT, &prompt)?;
    Ok(ComposedAnswer::Grounded(answer.trim().to_string()))
}
