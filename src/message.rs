//! Conversation message data model (§3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Running,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Failed)
    }
}

/// A single row in a conversation's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_key: String,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub error_text: Option<String>,
}

/// Structured assistant output: accumulated text plus the tool calls the
/// runner made while producing it. Serialized as `Message.content` for
/// assistant rows while a turn is running or after it finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantStructuredContent {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCallRecord>,
}

/// One tool call's accumulated state. Identity and merge-by-`call_id` is the
/// executor's concern; the record itself carries no id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub tool_name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}
