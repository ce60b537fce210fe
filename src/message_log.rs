//! Message log external interface (§4.C) plus an in-memory reference
//! implementation for tests and for callers that don't have a durable store
//! yet.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Message, MessageStatus, Role};

#[derive(Debug, Error)]
pub enum MessageLogError {
    #[error("message log write failed: {0}")]
    Write(String),

    #[error("message {0} not found")]
    NotFound(i64),
}

/// What the supervisor needs to know about a conversation's session row
/// before admitting a turn: whether it exists at all, and which scope it
/// belongs to (to reject cross-scope turns per §4.F).
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub exists: bool,
    pub scope_id: String,
}

/// Durable, per-conversation append log. Implementations must guarantee that
/// a single `insert_message`/`update_message` call is atomic: readers never
/// observe a half-written row.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn insert_message(
        &self,
        conversation_key: &str,
        role: Role,
        content: &str,
        status: MessageStatus,
        error_text: Option<&str>,
    ) -> Result<i64, MessageLogError>;

    async fn update_message(
        &self,
        id: i64,
        content: &str,
        status: MessageStatus,
        error_text: Option<&str>,
    ) -> Result<(), MessageLogError>;

    /// Most recent `limit` messages for a conversation, oldest first.
    async fn list_messages(&self, conversation_key: &str, limit: usize) -> Result<Vec<Message>, MessageLogError>;

    async fn get_session(&self, conversation_key: &str) -> Result<SessionInfo, MessageLogError>;
}

struct InMemoryState {
    next_id: i64,
    messages: HashMap<String, Vec<Message>>,
    sessions: HashMap<String, String>,
}

/// Reference `MessageLog`. Not a production durable store — state lives only
/// in process memory and is lost on restart, same as the actor queues it
/// sits behind.
pub struct InMemoryMessageLog {
    inner: Mutex<InMemoryState>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InMemoryState {
                next_id: 1,
                messages: HashMap::new(),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Register a conversation's session scope ahead of time, as a host
    /// application's session-creation endpoint would.
    pub fn register_session(&self, conversation_key: &str, scope_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(conversation_key.to_string(), scope_id.to_string());
    }
}

impl Default for InMemoryMessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn insert_message(
        &self,
        conversation_key: &str,
        role: Role,
        content: &str,
        status: MessageStatus,
        error_text: Option<&str>,
    ) -> Result<i64, MessageLogError> {
        let mut state = self.inner.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let message = Message {
            id,
            conversation_key: conversation_key.to_string(),
            role,
            content: content.to_string(),
            status,
            error_text: error_text.map(|s| s.to_string()),
        };
        state.messages.entry(conversation_key.to_string()).or_default().push(message);
        Ok(id)
    }

    async fn update_message(
        &self,
        id: i64,
        content: &str,
        status: MessageStatus,
        error_text: Option<&str>,
    ) -> Result<(), MessageLogError> {
        let mut state = self.inner.lock().unwrap();
        for messages in state.messages.values_mut() {
            if let Some(message) = messages.iter_mut().find(|m| m.id == id) {
                message.content = content.to_string();
                message.status = status;
                message.error_text = error_text.map(|s| s.to_string());
                return Ok(());
            }
        }
        Err(MessageLogError::NotFound(id))
    }

    async fn list_messages(&self, conversation_key: &str, limit: usize) -> Result<Vec<Message>, MessageLogError> {
        let state = self.inner.lock().unwrap();
        let Some(messages) = state.messages.get(conversation_key) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn get_session(&self, conversation_key: &str) -> Result<SessionInfo, MessageLogError> {
        let state = self.inner.lock().unwrap();
        match state.sessions.get(conversation_key) {
            Some(scope_id) => Ok(SessionInfo {
                exists: true,
                scope_id: scope_id.clone(),
            }),
            None => Ok(SessionInfo {
                exists: false,
                scope_id: String::new(),
            }),
        }
    }
}
