//! Conversation supervisor (§4.F).
//!
//! Layers on top of the [`crate::actor`] runtime: normalizes a caller's raw
//! turn request, routes it to the runtime keyed by conversation id, then —
//! inside the worker — re-validates, inserts the user/assistant message
//! pair, attaches an [`AllowedTools`] context, and delegates to
//! [`crate::executor::run_turn`]. One instance exists per conversation
//! flavor (project-manager or task-agent); both share the same runtime
//! implementation, differing only in which bus topic/id field they publish
//! under and how they resolve allowed tool names (§4.H).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::actor::{ActorRuntime, Event, Handler};
use crate::bus::{ConversationIdField, EventBus};
use crate::config::Config;
use crate::error::SupervisorError;
use crate::executor::{self, PublishContext, PublishConversationId};
use crate::inflight::InflightRegistry;
use crate::key::ConversationKey;
use crate::message::{MessageStatus, Role};
use crate::message_log::MessageLog;
use crate::runner::Runner;
use crate::scope::{AllowedTools, ConversationFlavor, ConversationScope, ExecutionScope, RuntimeScope};
use crate::tool_policy::{self, ToolPolicy};

/// A task-agent conversation's live command line, used by the tool-mode
/// resolver (§4.H). Project-manager conversations never consult this — the
/// spec describes it as "looked up in the message log / task store," which
/// the core treats as an external collaborator distinct from [`MessageLog`]
/// since nothing else in §4.C's contract carries it.
#[async_trait]
pub trait TaskCommandLookup: Send + Sync {
    async fn current_command(&self, conversation_key: &str) -> Option<String>;
}

/// Raw event payload as received from a caller, before normalization (§3).
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub conversation_key: String,
    pub scope_id: String,
    pub source: String,
    pub display_content: String,
    pub agent_prompt: String,
    pub trigger_meta: HashMap<String, Value>,
    pub responses_store: bool,
    pub disable_store_context: bool,
}

/// A `TurnRequest` after §3's normalization. Both text fields may still be
/// empty here — that failure is deferred to the dispatch handler (§4.F
/// admission step 3).
#[derive(Debug, Clone)]
struct NormalizedTurn {
    conversation_key: String,
    scope_id: String,
    source: String,
    display_content: String,
    agent_prompt: String,
    responses_store: bool,
    disable_store_context: bool,
}

fn normalize(req: TurnRequest) -> Result<NormalizedTurn, SupervisorError> {
    let conversation_key = req.conversation_key.trim().to_string();
    if conversation_key.is_empty() {
        return Err(SupervisorError::SessionRequired);
    }

    let mut display_content = req.display_content.trim().to_string();
    let mut agent_prompt = req.agent_prompt.trim().to_string();
    if display_content.is_empty() && !agent_prompt.is_empty() {
        display_content = agent_prompt.clone();
    }
    if agent_prompt.is_empty() && !display_content.is_empty() {
        agent_prompt = display_content.clone();
    }

    Ok(NormalizedTurn {
        conversation_key,
        scope_id: req.scope_id.trim().to_string(),
        source: req.source.trim().to_string(),
        display_content,
        agent_prompt,
        responses_store: req.responses_store,
        disable_store_context: req.disable_store_context,
    })
}

/// Which tool list a conversation resolves to, per §4.H.
enum ToolSource {
    /// Project-manager: codex-parity, recomputed each call, empty policy.
    ProjectManagerResolver,
    /// Task-agent: the task's current command, consulted once per turn.
    TaskAgent(Arc<dyn TaskCommandLookup>),
}

struct SupervisorHandler {
    message_log: Arc<dyn MessageLog>,
    bus: Arc<EventBus>,
    runner: Arc<dyn Runner>,
    config: Config,
    flavor: ConversationFlavor,
    tool_source: ToolSource,
    inflight: Option<Arc<InflightRegistry>>,
}

impl SupervisorHandler {
    fn topic_and_id(&self, conversation_key: &str) -> (&'static str, PublishConversationId, ConversationIdField) {
        match self.flavor {
            ConversationFlavor::ProjectManager => (
                "project.pm.messages.updated",
                PublishConversationId::Session(conversation_key.to_string()),
                ConversationIdField::Session(conversation_key.to_string()),
            ),
            ConversationFlavor::TaskAgent => (
                "task.messages.updated",
                PublishConversationId::Task(conversation_key.to_string()),
                ConversationIdField::Task(conversation_key.to_string()),
            ),
        }
    }

    async fn publish_running_checkpoint(&self, turn: &NormalizedTurn) {
        let (topic, _, id_field) = self.topic_and_id(&turn.conversation_key);
        let mut extra = Map::new();
        if !turn.source.is_empty() {
            extra.insert("source".to_string(), Value::String(turn.source.clone()));
        }
        self.bus.publish(topic, Some(&turn.scope_id), Some(id_field), extra).await;
    }

    async fn resolve_allowed_tools(&self, turn: &NormalizedTurn) -> AllowedTools {
        match &self.tool_source {
            ToolSource::ProjectManagerResolver => {
                AllowedTools::Resolver(Arc::new(|| tool_policy::resolve_allowed_tools(&tool_policy::codex_parity_profile(), &ToolPolicy::allow_all())))
            }
            ToolSource::TaskAgent(lookup) => {
                let command = lookup.current_command(&turn.conversation_key).await.unwrap_or_default();
                let (_, names) = tool_policy::resolve_tool_mode_and_names(&command);
                AllowedTools::List(names)
            }
        }
    }

    /// §4.F's dispatch handler. Returns before any message row exists only
    /// for `InvalidTurn`/`NotFound`/log-read failures (§7: "error before log
    /// insert"); every other path inserts the user/assistant pair first.
    async fn dispatch(&self, runtime_scope: RuntimeScope, turn: NormalizedTurn) -> Result<(), SupervisorError> {
        if turn.display_content.is_empty() && turn.agent_prompt.is_empty() {
            return Err(SupervisorError::InvalidTurn);
        }

        let session = self
            .message_log
            .get_session(&turn.conversation_key)
            .await
            .map_err(|e| SupervisorError::Log(e.to_string()))?;
        if !session.exists || session.scope_id != turn.scope_id {
            return Err(SupervisorError::NotFound);
        }

        self.message_log
            .insert_message(&turn.conversation_key, Role::User, &turn.display_content, MessageStatus::Completed, None)
            .await
            .map_err(|e| SupervisorError::Log(e.to_string()))?;

        let assistant_id = self
            .message_log
            .insert_message(&turn.conversation_key, Role::Assistant, "", MessageStatus::Running, None)
            .await
            .map_err(|e| SupervisorError::Log(e.to_string()))?;

        self.publish_running_checkpoint(&turn).await;

        let allowed_tools = self.resolve_allowed_tools(&turn).await;
        let conversation_scope = ConversationScope {
            conversation_key: turn.conversation_key.clone(),
            scope_id: turn.scope_id.clone(),
            source: turn.source.clone(),
            responses_store: turn.responses_store,
            disable_store_context: turn.disable_store_context,
            flavor: self.flavor,
        };
        let cancel_token = runtime_scope.cancel_token();
        let execution_scope = ExecutionScope::new(runtime_scope, conversation_scope, allowed_tools);

        if let Some(inflight) = &self.inflight {
            inflight.start(turn.conversation_key.clone(), assistant_id, cancel_token);
        }

        let (topic, conv_id, _) = self.topic_and_id(&turn.conversation_key);
        let publish_ctx = PublishContext {
            topic: topic.to_string(),
            scope_id: turn.scope_id.clone(),
            conversation_id: conv_id,
            source: turn.source.clone(),
        };

        let result = executor::run_turn(
            Arc::clone(&self.runner),
            Arc::clone(&self.message_log),
            Arc::clone(&self.bus),
            publish_ctx,
            execution_scope,
            assistant_id,
            &turn.agent_prompt,
            self.config.publish_coalesce_interval(),
        )
        .await;

        if let Some(inflight) = &self.inflight {
            inflight.clear(&turn.conversation_key);
        }

        result.map_err(SupervisorError::from)
    }
}

#[async_trait]
impl Handler<NormalizedTurn> for SupervisorHandler {
    async fn handle(&self, scope: RuntimeScope, turn: NormalizedTurn) {
        if let Err(e) = self.dispatch(scope, turn).await {
            tracing::warn!(error = %e, "turn dispatch did not complete");
        }
    }
}

/// Validates/shapes per-conversation events and drives them through the
/// actor runtime. One instance per flavor; construct with
/// [`ConversationSupervisor::project_manager`] or
/// [`ConversationSupervisor::task_agent`].
pub struct ConversationSupervisor {
    runtime: Arc<ActorRuntime<NormalizedTurn>>,
}

impl ConversationSupervisor {
    pub fn project_manager(
        message_log: Arc<dyn MessageLog>,
        bus: Arc<EventBus>,
        runner: Arc<dyn Runner>,
        config: Config,
        inflight: Option<Arc<InflightRegistry>>,
    ) -> Self {
        let capacity = config.actor_queue_capacity;
        let handler = Arc::new(SupervisorHandler {
            message_log,
            bus,
            runner,
            config,
            flavor: ConversationFlavor::ProjectManager,
            tool_source: ToolSource::ProjectManagerResolver,
            inflight,
        });
        Self { runtime: Arc::new(ActorRuntime::new(capacity, handler)) }
    }

    pub fn task_agent(
        message_log: Arc<dyn MessageLog>,
        bus: Arc<EventBus>,
        runner: Arc<dyn Runner>,
        config: Config,
        task_commands: Arc<dyn TaskCommandLookup>,
        inflight: Option<Arc<InflightRegistry>>,
    ) -> Self {
        let capacity = config.actor_queue_capacity;
        let handler = Arc::new(SupervisorHandler {
            message_log,
            bus,
            runner,
            config,
            flavor: ConversationFlavor::TaskAgent,
            tool_source: ToolSource::TaskAgent(task_commands),
            inflight,
        });
        Self { runtime: Arc::new(ActorRuntime::new(capacity, handler)) }
    }

    /// Admit a turn (§4.F admission steps 1-4). Synchronously rejects only
    /// an empty conversation key; everything else is validated inside the
    /// worker once dequeued.
    pub async fn submit(&self, ctx: &CancellationToken, request: TurnRequest) -> Result<(), SupervisorError> {
        let turn = normalize(request)?;
        let key = turn.conversation_key.clone();
        self.runtime.enqueue(ctx, Event { key, payload: turn }).await?;
        Ok(())
    }

    pub fn queue_len(&self, key: &ConversationKey) -> usize {
        self.runtime.queue_len(key)
    }

    pub fn cancel(&self, key: &ConversationKey) {
        self.runtime.cancel(key)
    }
}
