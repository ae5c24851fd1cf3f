//! Chat sessions and bounded conversation memory.
//!
//! Sessions are append-only: a (question, answer) turn is recorded after a
//! confirmed answer and never mutated or deleted. Prompt construction only
//! ever reads the most recent bounded window of turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Number of recent turns included when composing a prompt
pub const RECENT_TURN_WINDOW: usize = 5;

/// One completed question/answer exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

/// A chat session: id, owner tag, and ordered turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub user: Option<String>,
    pub turns: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    fn new(id: Uuid, user: Option<String>) -> Self {
        Self {
            id,
            user,
            turns: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The most recent turns, oldest first, capped at `limit`.
    pub fn recent_turns(&self, limit: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }
}

/// In-memory session store.
///
/// Appends are serialized by the write lock, so turns land in strict
/// completion order of their answer cycles even when independent sessions
/// run concurrently.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, ChatSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a session id, creating the session on first message if absent.
    pub async fn get_or_create(&self, id: Option<Uuid>, user: Option<String>) -> Uuid {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let mut sessions = self.sessions.write().await;
        sessions.entry(id).or_insert_with(|| ChatSession::new(id, user));
        id
    }

    /// Append a completed turn. Creates the session if the id is unknown.
    pub async fn append_turn(&self, id: Uuid, question: &str, answer: &str) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id).or_insert_with(|| ChatSession::new(id, None));
        session.turns.push(ConversationTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            asked_at: Utc::now(),
        });
    }

    /// The bounded recent window for prompt construction, oldest first.
    pub async fn recent_turns(&self, id: Uuid) -> Vec<ConversationTurn> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .map(|s| s.recent_turns(RECENT_TURN_WINDOW).to_vec())
            .unwrap_or_default()
    }

    /// Total turns recorded for a session
    pub async fn turn_count(&self, id: Uuid) -> usize {
        let sessions = self.sessions.read().await;
        sessions.get(&id).map(|s| s.turns.len()).unwrap_or(0)
    }
}
