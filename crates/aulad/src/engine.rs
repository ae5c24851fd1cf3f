//! Orchestrator and fallback state machine.
//!
//! One explicit chain answers every question:
//!
//! `SqlPrimary -> SqlRetryOnce -> VectorFallback -> ErrorTerminal`
//!
//! The primary path synthesizes, validates, executes, and composes. Any
//! stage failure transitions to a single retry that carries the error text
//! back into synthesis. A failed retry degrades to the vector-retrieval
//! path (configurable; it can go straight to terminal instead), and the
//! terminal state returns a fixed apology. No stage error ever reaches the
//! caller; every terminal transition records which system produced the
//! answer and, when degraded, why.

use crate::compose::{self, ComposedAnswer, Evidence, NO_CHUNKS_MESSAGE};
use crate::executor::SqlExecutor;
use crate::retriever::{normalize, ChunkSearcher, EvidenceChunk};
use crate::sanitize;
use crate::schema::SchemaProvider;
use crate::synth;
use aula_common::{
    AnswerSystem, AssistantError, ChatResponse, LlmClient, LlmConfig, RetrievalConfig,
    SessionStore, SourceInfo,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Fixed user-safe terminal message
pub const APOLOGY_MESSAGE: &str = "I'm sorry, I'm experiencing technical difficulties and cannot process your request right now. Please try again later.";

/// Sources included in a vector-path response
const MAX_REPORTED_SOURCES: usize = 5;

/// The question-answering orchestrator
pub struct Engine {
    llm: Arc<dyn LlmClient>,
    schema: Arc<dyn SchemaProvider>,
    executor: Arc<dyn SqlExecutor>,
    searcher: Arc<dyn ChunkSearcher>,
    sessions: Arc<SessionStore>,
    llm_config: LlmConfig,
    retrieval_config: RetrievalConfig,
    /// Backpressure on in-flight model calls
    llm_permits: Arc<Semaphore>,
}

/// Result of one answering path, before wire mapping
struct PathOutcome {
    answer: ComposedAnswer,
    sources: Vec<SourceInfo>,
}

impl Engine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        schema: Arc<dyn SchemaProvider>,
        executor: Arc<dyn SqlExecutor>,
        searcher: Arc<dyn ChunkSearcher>,
        sessions: Arc<SessionStore>,
        llm_config: LlmConfig,
        retrieval_config: RetrievalConfig,
    ) -> Self {
        let llm_permits = Arc::new(Semaphore::new(llm_config.max_concurrent_calls));
        Self {
            llm,
            schema,
            executor,
            searcher,
            sessions,
            llm_config,
            retrieval_config,
            llm_permits,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// Answer one question. Never returns an error: the terminal state of
    /// the fallback chain is a fixed apology response.
    pub async fn answer(
        &self,
        question: &str,
        session_id: Option<Uuid>,
        user: Option<String>,
    ) -> ChatResponse {
        let session_id = self.sessions.get_or_create(session_id, user).await;

        // SqlPrimary
        let primary_err = match self.sql_attempt(question, session_id, None).await {
            Ok(outcome) => {
                info!(session = %session_id, "answered by primary SQL system");
                return self.respond(session_id, outcome, AnswerSystem::Sql, None);
            }
            Err(e) => {
                warn!(session = %session_id, stage = e.stage(), "primary SQL attempt failed: {}", e);
                e
            }
        };

        // SqlRetryOnce: exactly one retry, carrying the error as feedback
        let retry_err = match self
            .sql_attempt(question, session_id, Some(&primary_err.to_string()))
            .await
        {
            Ok(outcome) => {
                info!(session = %session_id, "answered by SQL system on retry");
                return self.respond(session_id, outcome, AnswerSystem::Sql, None);
            }
            Err(e) => {
                warn!(session = %session_id, stage = e.stage(), "SQL retry failed: {}", e);
                e
            }
        };

        // VectorFallback, unless configured to terminate instead
        if self.retrieval_config.fallback_to_vector {
            match self.vector_attempt(question, session_id).await {
                Ok(outcome) => {
                    info!(
                        session = %session_id,
                        reason = %retry_err,
                        "answered by vector fallback system"
                    );
                    return self.respond(
                        session_id,
                        outcome,
                        AnswerSystem::Vector,
                        Some(retry_err.to_string()),
                    );
                }
                Err(fallback_err) => {
                    error!(
                        session = %session_id,
                        sql_error = %retry_err,
                        fallback_error = %fallback_err,
                        "all answering systems failed"
                    );
                    return self.terminal(
                        session_id,
                        format!("sql: {}; vector: {}", retry_err, fallback_err),
                    );
                }
            }
        }

        error!(session = %session_id, sql_error = %retry_err, "SQL system failed with fallback disabled");
        self.terminal(session_id, retry_err.to_string())
    }

    /// One pass through the SQL path: schema -> synthesize -> validate ->
    /// execute -> compose. With `error_feedback` set this is the retry leg.
    async fn sql_attempt(
        &self,
        question: &str,
        session_id: Uuid,
        error_feedback: Option<&str>,
    ) -> Result<PathOutcome, AssistantError> {
        let schema_text = self.schema.schema_text(false).await?;

        let candidate = {
            let model = self.llm_config.sql_model.clone();
            let question = question.to_string();
            let feedback = error_feedback.map(|s| s.to_string());
            self.run_model_call(move |llm| {
                synth::synthesize(
                    llm.as_ref(),
                    &model,
                    &question,
                    &schema_text,
                    feedback.as_deref(),
                )
            })
            .await
            .map_err(AssistantError::Synthesis)??
        };

        let validated = sanitize::validate(&candidate)?;
        let rows = self.executor.run(&validated).await?;

        let recent = self.sessions.recent_turns(session_id).await;
        let composed = {
            let model = self.llm_config.answer_model.clone();
            let question = question.to_string();
            let evidence = Evidence::Rows(rows);
            self.run_model_call(move |llm| {
                compose::compose(llm.as_ref(), &model, &question, &evidence, &recent)
            })
            .await
            .map_err(AssistantError::Synthesis)?
            .map_err(|e| AssistantError::Synthesis(format!("answer composition failed: {}", e)))?
        };

        self.record_turn(session_id, question, &composed).await;
        Ok(PathOutcome {
            answer: composed,
            sources: Vec::new(),
        })
    }

    /// The fallback path: embed -> retrieve -> compose.
    async fn vector_attempt(
        &self,
        question: &str,
        session_id: Uuid,
    ) -> Result<PathOutcome, AssistantError> {
        let raw = {
            let model = self.llm_config.embed_model.clone();
            let question = question.to_string();
            self.run_model_call(move |llm| llm.embed(&model, &question))
                .await
                .map_err(AssistantError::Retrieval)?
                .map_err(|e| AssistantError::Retrieval(e.to_string()))?
        };

        // Zero-norm embedding: ranking is undefined, treat as no evidence
        let embedding = match normalize(raw) {
            Some(v) => v,
            None => {
                warn!(session = %session_id, "question embedded to zero vector");
                return Ok(PathOutcome {
                    answer: ComposedAnswer::NoEvidence(NO_CHUNKS_MESSAGE.to_string()),
                    sources: Vec::new(),
                });
            }
        };

        let chunks = self
            .searcher
            .top_k(&embedding, self.retrieval_config.top_k)
            .await?;
        let sources = chunk_sources(&chunks);

        let recent = self.sessions.recent_turns(session_id).await;
        let composed = {
            let model = self.llm_config.answer_model.clone();
            let question = question.to_string();
            let evidence = Evidence::Chunks(chunks);
            self.run_model_call(move |llm| {
                compose::compose(llm.as_ref(), &model, &question, &evidence, &recent)
            })
            .await
            .map_err(AssistantError::Retrieval)?
            .map_err(|e| AssistantError::Retrieval(format!("answer composition failed: {}", e)))?
        };

        self.record_turn(session_id, question, &composed).await;
        Ok(PathOutcome {
            answer: composed,
            sources,
        })
    }

    /// Dispatch a blocking model call off the scheduler, bounded by the
    /// concurrency cap.
    async fn run_model_call<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(Arc<dyn LlmClient>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .llm_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| e.to_string())?;
        let llm = self.llm.clone();
        tokio::task::spawn_blocking(move || f(llm))
            .await
            .map_err(|e| e.to_string())
    }

    /// Session memory only records confirmed model-composed answers; the
    /// fixed no-evidence messages are not turns.
    async fn record_turn(&self, session_id: Uuid, question: &str, composed: &ComposedAnswer) {
        if let ComposedAnswer::Grounded(answer) = composed {
            self.sessions.append_turn(session_id, question, answer).await;
        }
    }

    fn respond(
        &self,
        session_id: Uuid,
        outcome: PathOutcome,
        system: AnswerSystem,
        fallback_reason: Option<String>,
    ) -> ChatResponse {
        ChatResponse {
            answer: outcome.answer.text().to_string(),
            session_id,
            sources: outcome.sources,
            system_used: system,
            fallback_reason,
        }
    }

    fn terminal(&self, session_id: Uuid, reason: String) -> ChatResponse {
        ChatResponse {
            answer: APOLOGY_MESSAGE.to_string(),
            session_id,
            sources: Vec::new(),
            system_used: AnswerSystem::Error,
            fallback_reason: Some(reason),
        }
    }
}

fn chunk_sources(chunks: &[EvidenceChunk]) -> Vec<SourceInfo> {
    chunks
        .iter()
        .take(MAX_REPORTED_SOURCES)
        .map(|c| SourceInfo {
            content: c.text.clone(),
            metadata: c.metadata.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ResultRow;
    use crate::sanitize::ValidatedQuery;
    use async_trait::async_trait;
    use aula_common::FakeLlmClient;
    use std::sync::Mutex;

    struct FakeSchema;

    #[async_trait]
    impl SchemaProvider for FakeSchema {
        async fn schema_text(&self, _force_refresh: bool) -> Result<String, AssistantError> {
            Ok("TABLE students\n  COLUMNS: student_id integer, full_name text".to_string())
        }
    }

    struct FakeExecutor {
        results: Mutex<Vec<Result<Vec<ResultRow>, AssistantError>>>,
        calls: Mutex<usize>,
    }

    impl FakeExecutor {
        fn new(results: Vec<Result<Vec<ResultRow>, AssistantError>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SqlExecutor for FakeExecutor {
        async fn run(&self, _query: &ValidatedQuery) -> Result<Vec<ResultRow>, AssistantError> {
            *self.calls.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                return Err(AssistantError::Execution("no scripted result".to_string()));
            }
            if results.len() == 1 {
                results[0].clone()
            } else {
                results.remove(0)
            }
        }
    }

    struct FakeSearcher {
        chunks: Vec<EvidenceChunk>,
        calls: Mutex<usize>,
    }

    impl FakeSearcher {
        fn new(chunks: Vec<EvidenceChunk>) -> Self {
            Self {
                chunks,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChunkSearcher for FakeSearcher {
        async fn top_k(
            &self,
            _embedding: &[f32],
            _k: usize,
        ) -> Result<Vec<EvidenceChunk>, AssistantError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.chunks.clone())
        }
    }

    fn score_row() -> ResultRow {
        let mut row = ResultRow::new();
        row.insert("full_name".to_string(), "Amira Khalil".into());
        row.insert("score".to_string(), 95.into());
        row
    }

    fn chunk() -> EvidenceChunk {
        EvidenceChunk {
            text: "Amira Khalil scored 95 out of 100 in \"Final Project\".".to_string(),
            metadata: serde_json::json!({"source": "assessment_result"}),
        }
    }

    fn engine(
        llm: Arc<FakeLlmClient>,
        executor: Arc<FakeExecutor>,
        searcher: Arc<FakeSearcher>,
        fallback_to_vector: bool,
    ) -> Engine {
        Engine::new(
            llm,
            Arc::new(FakeSchema),
            executor,
            searcher,
            Arc::new(SessionStore::new()),
            LlmConfig::default(),
            RetrievalConfig {
                top_k: 50,
                fallback_to_vector,
            },
        )
    }

    #[tokio::test]
    async fn test_primary_path_success() {
        let llm = Arc::new(FakeLlmClient::new(vec![
            Ok("SELECT full_name, score FROM grades ORDER BY score DESC LIMIT 5;".to_string()),
            Ok("Amira Khalil has the top score with 95.".to_string()),
        ]));
        let executor = Arc::new(FakeExecutor::new(vec![Ok(vec![score_row()])]));
        let searcher = Arc::new(FakeSearcher::new(vec![]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), true);

        let response = engine.answer("Who has the top score?", None, None).await;

        assert_eq!(response.system_used, AnswerSystem::Sql);
        assert_eq!(response.answer, "Amira Khalil has the top score with 95.");
        assert!(response.fallback_reason.is_none());
        assert_eq!(executor.calls(), 1);
        assert_eq!(searcher.calls(), 0);
        // One synthesis call, one composition call
        assert_eq!(llm.chat_count(), 2);
        // The confirmed answer became a turn
        assert_eq!(engine.sessions().turn_count(response.session_id).await, 1);
    }

    #[tokio::test]
    async fn test_execution_failure_retries_exactly_once_then_falls_back() {
        let llm = Arc::new(
            FakeLlmClient::new(vec![
                Ok("SELECT wrong_col FROM grades LIMIT 5;".to_string()),
                Ok("SELECT also_wrong FROM grades LIMIT 5;".to_string()),
                Ok("Fallback answer from chunks.".to_string()),
            ])
            .with_embeddings(vec![Ok(vec![0.6, 0.8])]),
        );
        let executor = Arc::new(FakeExecutor::new(vec![Err(AssistantError::Execution(
            "column \"wrong_col\" does not exist".to_string(),
        ))]));
        let searcher = Arc::new(FakeSearcher::new(vec![chunk()]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), true);

        let response = engine.answer("top grades in Deep Learning?", None, None).await;

        // Exactly one retry: two executor attempts, never a third
        assert_eq!(executor.calls(), 2);
        // The retry prompt carried the execution error text
        let prompts = llm.chat_prompts();
        assert!(prompts[1].1.contains("wrong_col"));
        assert!(prompts[1].1.contains("The previous SQL failed with error:"));

        assert_eq!(response.system_used, AnswerSystem::Vector);
        assert_eq!(response.answer, "Fallback answer from chunks.");
        assert!(response
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("wrong_col"));
        assert_eq!(searcher.calls(), 1);
        assert_eq!(response.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_success_stays_on_sql_system() {
        let llm = Arc::new(FakeLlmClient::new(vec![
            Ok("SELECT wrong FROM grades LIMIT 5;".to_string()),
            Ok("SELECT score FROM grades ORDER BY score DESC LIMIT 5;".to_string()),
            Ok("Fixed on retry.".to_string()),
        ]));
        let executor = Arc::new(FakeExecutor::new(vec![
            Err(AssistantError::Execution("syntax error".to_string())),
            Ok(vec![score_row()]),
        ]));
        let searcher = Arc::new(FakeSearcher::new(vec![]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), true);

        let response = engine.answer("q", None, None).await;

        assert_eq!(response.system_used, AnswerSystem::Sql);
        assert!(response.fallback_reason.is_none());
        assert_eq!(executor.calls(), 2);
        assert_eq!(searcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_candidate_never_executes() {
        let llm = Arc::new(FakeLlmClient::new(vec![
            Ok("DROP TABLE students".to_string()),
            Ok("SELECT full_name FROM students LIMIT 5;".to_string()),
            Ok("Safe answer.".to_string()),
        ]));
        let executor = Arc::new(FakeExecutor::new(vec![Ok(vec![score_row()])]));
        let searcher = Arc::new(FakeSearcher::new(vec![]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), true);

        let response = engine.answer("q", None, None).await;

        // The rejected candidate consumed the primary attempt without ever
        // reaching the executor; the retry executed the safe statement
        assert_eq!(response.system_used, AnswerSystem::Sql);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_terminal_when_fallback_disabled() {
        let llm = Arc::new(FakeLlmClient::always("SELECT x FROM grades LIMIT 5;"));
        let executor = Arc::new(FakeExecutor::new(vec![Err(AssistantError::Execution(
            "db down".to_string(),
        ))]));
        let searcher = Arc::new(FakeSearcher::new(vec![chunk()]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), false);

        let response = engine.answer("q", None, None).await;

        assert_eq!(response.system_used, AnswerSystem::Error);
        assert_eq!(response.answer, APOLOGY_MESSAGE);
        assert!(response.fallback_reason.as_deref().unwrap().contains("db down"));
        assert_eq!(executor.calls(), 2);
        assert_eq!(searcher.calls(), 0);
        // Nothing is recorded for a terminal apology
        assert_eq!(engine.sessions().turn_count(response.session_id).await, 0);
    }

    #[tokio::test]
    async fn test_empty_rows_short_circuit_counts_as_sql_answer() {
        let llm = Arc::new(FakeLlmClient::always(
            "SELECT full_name FROM students WHERE full_name ILIKE '%nobody%' LIMIT 5;",
        ));
        let executor = Arc::new(FakeExecutor::new(vec![Ok(vec![])]));
        let searcher = Arc::new(FakeSearcher::new(vec![]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), true);

        let response = engine.answer("grades of Nobody?", None, None).await;

        assert_eq!(response.system_used, AnswerSystem::Sql);
        assert_eq!(response.answer, crate::compose::NO_ROWS_MESSAGE);
        // Synthesis ran, composition never did
        assert_eq!(llm.chat_count(), 1);
        // Fixed messages are not recorded as turns
        assert_eq!(engine.sessions().turn_count(response.session_id).await, 0);
    }

    #[tokio::test]
    async fn test_zero_vector_question_yields_no_evidence_message() {
        let llm = Arc::new(
            FakeLlmClient::new(vec![Err(aula_common::LlmError::EmptyResponse)])
                .with_embeddings(vec![Ok(vec![0.0, 0.0, 0.0])]),
        );
        let executor = Arc::new(FakeExecutor::new(vec![Err(AssistantError::Execution(
            "down".to_string(),
        ))]));
        let searcher = Arc::new(FakeSearcher::new(vec![chunk()]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), true);

        let response = engine.answer("", None, None).await;

        assert_eq!(response.system_used, AnswerSystem::Vector);
        assert_eq!(response.answer, NO_CHUNKS_MESSAGE);
        // Ranking is undefined for a zero vector; the store is never searched
        assert_eq!(searcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_session_memory_feeds_later_prompts() {
        let llm = Arc::new(FakeLlmClient::new(vec![
            Ok("SELECT score FROM grades LIMIT 5;".to_string()),
            Ok("Salma scored 92.".to_string()),
            Ok("SELECT score FROM grades LIMIT 5;".to_string()),
            Ok("She was absent twice.".to_string()),
        ]));
        let executor = Arc::new(FakeExecutor::new(vec![Ok(vec![score_row()])]));
        let searcher = Arc::new(FakeSearcher::new(vec![]));
        let engine = engine(llm.clone(), executor.clone(), searcher.clone(), true);

        let first = engine.answer("What did Salma score?", None, None).await;
        let second = engine
            .answer("How often was she absent?", Some(first.session_id), None)
            .await;

        assert_eq!(first.session_id, second.session_id);
        // The second composition prompt carries the first exchange
        let prompts = llm.chat_prompts();
        let compose_prompt = &prompts[3].1;
        assert!(compose_prompt.contains("Q: What did Salma score?"));
        assert!(compose_prompt.contains("A: Salma scored 92."));
    }
}
