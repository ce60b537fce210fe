//! Scope carriers passed from the supervisor down into the executor and the
//! runner (§6 "scope carriers").

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Which flavor of conversation a turn belongs to. Determines the event bus
/// topic and which id field (`session_id` vs `task_id`) is attached to
/// published events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationFlavor {
    ProjectManager,
    TaskAgent,
}

/// The cancellation-capable scope an actor worker hands to its handler for a
/// single dequeued event. Fresh per invocation; discarded once the handler
/// returns.
#[derive(Debug, Clone)]
pub struct RuntimeScope {
    cancel: CancellationToken,
}

impl RuntimeScope {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Either a fixed tool name list or a resolver closure, matching §4.E/§4.H's
/// "attach either a pre-resolved list or a resolver."
#[derive(Clone)]
pub enum AllowedTools {
    List(Vec<String>),
    Resolver(Arc<dyn Fn() -> Vec<String> + Send + Sync>),
}

impl AllowedTools {
    pub fn resolve(&self) -> Vec<String> {
        match self {
            AllowedTools::List(list) => list.clone(),
            AllowedTools::Resolver(f) => f(),
        }
    }
}

impl fmt::Debug for AllowedTools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedTools::List(list) => f.debug_tuple("List").field(list).finish(),
            AllowedTools::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// The conversation-identifying fields a runner and the history assembler
/// need but the actor runtime itself doesn't care about.
#[derive(Debug, Clone)]
pub struct ConversationScope {
    pub conversation_key: String,
    pub scope_id: String,
    pub source: String,
    pub responses_store: bool,
    pub disable_store_context: bool,
    pub flavor: ConversationFlavor,
}

/// The full scope handed to a `Runner`: cancellation, conversation identity,
/// and the allowed tool names for this turn.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    runtime: RuntimeScope,
    pub conversation: ConversationScope,
    pub allowed_tools: AllowedTools,
}

impl ExecutionScope {
    pub fn new(runtime: RuntimeScope, conversation: ConversationScope, allowed_tools: AllowedTools) -> Self {
        Self {
            runtime,
            conversation,
            allowed_tools,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.runtime.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.runtime.cancelled().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.runtime.cancel_token()
    }
}
