//! Typed error taxonomy for the turn runtime (§4.K).
//!
//! Each subsystem gets its own `thiserror` enum; `TurnError` composes them for
//! callers driving a turn end-to-end. `Display` text on every variant is what
//! ends up in `Message.error_text`, so it is written for an audit log, not
//! just a developer's terminal.

use thiserror::Error;

/// Errors surfaced by the keyed actor runtime (§4.A).
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("conversation key is empty after trimming")]
    InvalidKey,

    #[error("cancelled before the event was accepted")]
    Cancelled,

    #[error("actor runtime is unavailable")]
    RuntimeUnavailable,
}

/// Errors surfaced by the conversation supervisor (§4.F).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("conversationKey is required")]
    SessionRequired,

    #[error("turn has no displayContent or agentPrompt after normalization")]
    InvalidTurn,

    #[error("conversation not found or does not belong to the claimed scope")]
    NotFound,

    #[error("message log error: {0}")]
    Log(String),

    #[error(transparent)]
    Actor(#[from] ActorError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Errors surfaced by the streaming turn executor (§4.G).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("runner reported a failure: {0}")]
    RunnerFailure(String),

    #[error("turn was cancelled")]
    Cancelled,

    #[error("message log write failed: {0}")]
    PersistenceFailure(String),
}

/// Aggregate error for a caller driving a turn end-to-end.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Actor(#[from] ActorError),
}
