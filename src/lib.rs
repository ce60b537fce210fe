//! Keyed conversation turn runtime.
//!
//! Mediates between a user-facing client and an injected external agent-loop
//! runner: one conversation at a time is admitted through the
//! [`supervisor`], serialized per conversation key by the [`actor`] runtime,
//! driven to completion by the [`executor`], and observed by the [`bus`]'s
//! subscribers. [`history`] assembles prior turns into a runner-ready prompt
//! prefix; [`message_log`] is the durable store a host application plugs in;
//! [`tool_policy`] resolves which tool names a turn may use.

pub mod actor;
pub mod bus;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod inflight;
pub mod key;
pub mod message;
pub mod message_log;
pub mod runner;
pub mod scope;
pub mod supervisor;
pub mod telemetry;
pub mod tool_policy;

pub use config::Config;
pub use error::{ActorError, ExecutorError, SupervisorError, TurnError};
pub use history::{HistoryMeta, HistoryOptions};
pub use key::ConversationKey;
pub use message::{AssistantStructuredContent, Message, MessageStatus, Role, ToolCallRecord};
pub use message_log::{MessageLog, MessageLogError, SessionInfo};
pub use runner::{Runner, RunnerCapability, RunnerError, ToolEvent};
pub use scope::{AllowedTools, ConversationFlavor, ConversationScope, ExecutionScope, RuntimeScope};
pub use supervisor::{ConversationSupervisor, TaskCommandLookup, TurnRequest};
pub use telemetry::init_tracing;
