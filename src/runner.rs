//! The external agent-loop runner interface (§6).
//!
//! A runner is injected by the host application; the crate never implements
//! one for production use. The capability ladder is realized as three
//! sub-traits and an enum the executor matches on, rather than three
//! `Option<...>` probe methods — this stays structurally typed without
//! requiring every runner to implement streaming.

use async_trait::async_trait;

use crate::scope::ExecutionScope;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct RunnerError(pub String);

impl RunnerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A single tool-call lifecycle event emitted by a streaming-with-tools
/// runner. Identified by `call_id`; the executor merges these by id into
/// `ToolCallRecord`s.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub call_id: String,
    pub event_type: String,
    pub tool_name: String,
    pub state: String,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error_text: Option<String>,
}

/// One-shot, non-streaming execution.
#[async_trait]
pub trait RunBasic: Send + Sync {
    async fn run(&self, scope: &ExecutionScope, prompt: &str) -> Result<String, RunnerError>;
}

/// Streaming text output, no tool-call telemetry.
#[async_trait]
pub trait RunStream: Send + Sync {
    async fn run_stream(
        &self,
        scope: &ExecutionScope,
        prompt: &str,
        on_delta: &(dyn Fn(String) + Send + Sync),
    ) -> Result<String, RunnerError>;
}

/// Streaming text output plus tool-call telemetry.
#[async_trait]
pub trait RunStreamWithTools: Send + Sync {
    async fn run_stream_with_tools(
        &self,
        scope: &ExecutionScope,
        prompt: &str,
        on_delta: &(dyn Fn(String) + Send + Sync),
        on_tool_event: &(dyn Fn(ToolEvent) + Send + Sync),
    ) -> Result<String, RunnerError>;
}

/// The capability a runner actually offers, in probe order from richest to
/// plainest. The executor dispatches on this instead of downcasting.
pub enum RunnerCapability<'a> {
    StreamWithTools(&'a dyn RunStreamWithTools),
    Stream(&'a dyn RunStream),
    Basic(&'a dyn RunBasic),
}

pub trait Runner: Send + Sync {
    fn capability(&self) -> RunnerCapability<'_>;
}

/// Reference runner used by the crate's own tests and as a runnable example
/// of implementing this interface. Echoes the prompt back, optionally with a
/// fixed delay to exercise coalescing.
pub struct EchoRunner {
    pub prefix: String,
}

impl EchoRunner {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

#[async_trait]
impl RunBasic for EchoRunner {
    async fn run(&self, _scope: &ExecutionScope, prompt: &str) -> Result<String, RunnerError> {
        Ok(format!("{}{}", self.prefix, prompt))
    }
}

impl Runner for EchoRunner {
    fn capability(&self) -> RunnerCapability<'_> {
        RunnerCapability::Basic(self)
    }
}

/// Reference runner exercising the streaming-with-tools probe level: emits
/// the prompt back one word at a time and raises a single synthetic tool
/// call in between.
pub struct StreamingEchoRunner {
    pub prefix: String,
}

impl StreamingEchoRunner {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

#[async_trait]
impl RunStreamWithTools for StreamingEchoRunner {
    async fn run_stream_with_tools(
        &self,
        scope: &ExecutionScope,
        prompt: &str,
        on_delta: &(dyn Fn(String) + Send + Sync),
        on_tool_event: &(dyn Fn(ToolEvent) + Send + Sync),
    ) -> Result<String, RunnerError> {
        let mut full = self.prefix.clone();
        if !full.is_empty() {
            on_delta(full.clone());
        }
        for word in prompt.split_whitespace() {
            if scope.is_cancelled() {
                return Err(RunnerError::new("cancelled"));
            }
            let delta = format!(" {}", word);
            full.push_str(&delta);
            on_delta(delta);
        }
        on_tool_event(ToolEvent {
            call_id: "call_1".to_string(),
            event_type: "tool_call".to_string(),
            tool_name: "echo".to_string(),
            state: "completed".to_string(),
            input: Some(serde_json::json!({ "prompt": prompt })),
            output: Some(serde_json::json!({ "echoed": true })),
            error_text: None,
        });
        Ok(full)
    }
}

impl Runner for StreamingEchoRunner {
    fn capability(&self) -> RunnerCapability<'_> {
        RunnerCapability::StreamWithTools(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{AllowedTools, ConversationFlavor, ConversationScope, ExecutionScope, RuntimeScope};
    use tokio_util::sync::CancellationToken;

    fn test_scope() -> ExecutionScope {
        ExecutionScope::new(
            RuntimeScope::new(CancellationToken::new()),
            ConversationScope {
                conversation_key: "k".to_string(),
                scope_id: "s".to_string(),
                source: "test".to_string(),
                responses_store: false,
                disable_store_context: false,
                flavor: ConversationFlavor::ProjectManager,
            },
            AllowedTools::List(vec![]),
        )
    }

    #[tokio::test]
    async fn echo_runner_echoes() {
        let runner = EchoRunner::new("echo: ");
        let scope = test_scope();
        let out = runner.run(&scope, "hi").await.unwrap();
        assert_eq!(out, "echo: hi");
    }

    #[tokio::test]
    async fn streaming_echo_runner_emits_deltas_and_one_tool_event() {
        let runner = StreamingEchoRunner::new("");
        let scope = test_scope();
        let deltas = std::sync::Mutex::new(Vec::new());
        let tool_events = std::sync::Mutex::new(Vec::new());
        let on_delta = |d: String| deltas.lock().unwrap().push(d);
        let on_tool = |e: ToolEvent| tool_events.lock().unwrap().push(e);
        let out = runner
            .run_stream_with_tools(&scope, "hi there", &on_delta, &on_tool)
            .await
            .unwrap();
        assert_eq!(out, " hi there");
        assert_eq!(deltas.into_inner().unwrap().len(), 2);
        assert_eq!(tool_events.into_inner().unwrap().len(), 1);
    }
}
