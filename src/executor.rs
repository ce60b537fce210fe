//! Streaming turn executor (§4.G).
//!
//! Drives one turn against an injected [`Runner`], probing its capability
//! ladder from richest to plainest, coalescing partial output into
//! checkpoints no more than once per [`Config::publish_coalesce_interval`],
//! and finalizing the assistant message's terminal status.
//!
//! The runner's `on_delta`/`on_tool_event` callbacks are synchronous (§6) —
//! they cannot themselves await a message-log write or a bus publish. Each
//! callback updates an in-memory accumulator behind a short-held
//! [`std::sync::Mutex`] and, when the coalescing interval has elapsed,
//! schedules the actual persistence/publish as a detached task on the
//! current runtime. The *terminal* checkpoint is never detached: it is
//! awaited directly so a caller observing `run_turn`'s return also observes
//! the final persisted row.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Map;

use crate::bus::{ConversationIdField, EventBus};
use crate::error::ExecutorError;
use crate::message::{AssistantStructuredContent, MessageStatus, ToolCallRecord};
use crate::message_log::MessageLog;
use crate::runner::{Runner, RunnerCapability, ToolEvent};
use crate::scope::ExecutionScope;

/// Everything `run_turn` needs to know in order to publish an `updated`
/// event for this turn, matching §4.B/§4.F's envelope shape.
#[derive(Debug, Clone)]
pub struct PublishContext {
    pub topic: String,
    pub scope_id: String,
    pub conversation_id: PublishConversationId,
    pub source: String,
}

#[derive(Debug, Clone)]
pub enum PublishConversationId {
    Task(String),
    Session(String),
}

impl PublishConversationId {
    fn to_bus(&self) -> ConversationIdField {
        match self {
            PublishConversationId::Task(id) => ConversationIdField::Task(id.clone()),
            PublishConversationId::Session(id) => ConversationIdField::Session(id.clone()),
        }
    }
}

struct AccumulatorState {
    content: AssistantStructuredContent,
    tool_index: HashMap<String, usize>,
}

/// Shared, thread-safe accumulation buffer for one in-flight turn.
struct Accumulator {
    state: Mutex<AccumulatorState>,
    last_publish_at: Mutex<Option<Instant>>,
    pending_flushes: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            state: Mutex::new(AccumulatorState {
                content: AssistantStructuredContent::default(),
                tool_index: HashMap::new(),
            }),
            last_publish_at: Mutex::new(None),
            pending_flushes: Mutex::new(Vec::new()),
        }
    }

    fn append_text(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.state.lock().unwrap().content.text.push_str(delta);
    }

    /// Merge a tool event by `call_id`: first occurrence appends a new
    /// record, subsequent occurrences merge non-empty fields into the
    /// existing one, preserving its original index.
    fn merge_tool_event(&self, event: ToolEvent) {
        let mut state = self.state.lock().unwrap();
        if let Some(&idx) = state.tool_index.get(&event.call_id) {
            let record = &mut state.content.tools[idx];
            if !event.tool_name.is_empty() {
                record.tool_name = event.tool_name;
            }
            if !event.state.is_empty() {
                record.state = event.state;
            }
            if !event.event_type.is_empty() {
                record.kind = event.event_type;
            }
            if event.input.is_some() {
                record.input = event.input;
            }
            if event.output.is_some() {
                record.output = event.output;
            }
            if event.error_text.is_some() {
                record.error_text = event.error_text;
            }
        } else {
            let call_id = event.call_id.clone();
            state.content.tools.push(ToolCallRecord {
                kind: event.event_type,
                tool_name: event.tool_name,
                state: event.state,
                input: event.input,
                output: event.output,
                error_text: event.error_text,
            });
            if !call_id.is_empty() {
                state.tool_index.insert(call_id, state.content.tools.len() - 1);
            }
        }
    }

    fn snapshot(&self) -> AssistantStructuredContent {
        self.state.lock().unwrap().content.clone()
    }

    fn push_pending(&self, handle: tokio::task::JoinHandle<()>) {
        self.pending_flushes.lock().unwrap().push(handle);
    }

    /// Await every flush spawned so far. Called once the runner has
    /// returned, before the terminal write, so a late non-terminal
    /// checkpoint can never land after (and regress) the terminal one.
    async fn join_pending(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.pending_flushes.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Returns `true` and marks `now` as the last publish instant if this
    /// call should actually publish: `force`, or the coalescing interval has
    /// elapsed since the previous publish.
    fn should_publish(&self, force: bool, interval: Duration) -> bool {
        let mut last = self.last_publish_at.lock().unwrap();
        let now = Instant::now();
        let due = force
            || match *last {
                None => true,
                Some(prev) => now.duration_since(prev) >= interval,
            };
        if due {
            *last = Some(now);
        }
        due
    }
}

async fn persist_and_publish(
    message_log: &dyn MessageLog,
    bus: &EventBus,
    publish: &PublishContext,
    assistant_id: i64,
    content: &AssistantStructuredContent,
    status: MessageStatus,
    error_text: Option<&str>,
) -> Result<(), ExecutorError> {
    let serialized = serde_json::to_string(content).unwrap_or_default();
    message_log
        .update_message(assistant_id, &serialized, status, error_text)
        .await
        .map_err(|e| ExecutorError::PersistenceFailure(e.to_string()))?;

    let mut extra = Map::new();
    if let Some(err) = error_text {
        extra.insert("error".to_string(), serde_json::json!(err));
    }
    if !publish.source.is_empty() {
        extra.insert("source".to_string(), serde_json::json!(publish.source));
    }
    bus.publish(
        publish.topic.clone(),
        Some(&publish.scope_id),
        Some(publish.conversation_id.to_bus()),
        extra,
    )
    .await;
    Ok(())
}

/// Run one turn to completion, persisting and publishing checkpoints as it
/// goes. `assistant_id` must already be the id of a `running`,
/// empty-content assistant row (§4.F step 3) — this function only ever
/// updates it, never inserts.
pub async fn run_turn(
    runner: Arc<dyn Runner>,
    message_log: Arc<dyn MessageLog>,
    bus: Arc<EventBus>,
    publish: PublishContext,
    scope: ExecutionScope,
    assistant_id: i64,
    prompt: &str,
    coalesce_interval: Duration,
) -> Result<(), ExecutorError> {
    let is_basic = matches!(runner.capability(), RunnerCapability::Basic(_));
    if is_basic {
        let result = match runner.capability() {
            RunnerCapability::Basic(r) => r.run(&scope, prompt).await,
            _ => unreachable!("capability() is stable across calls for a given runner"),
        };
        finalize(&*message_log, &bus, &publish, assistant_id, AssistantStructuredContent::default(), result).await
    } else {
        run_streaming(runner, message_log, bus, publish, scope, assistant_id, prompt, coalesce_interval).await
    }
}

async fn run_streaming(
    runner: Arc<dyn Runner>,
    message_log: Arc<dyn MessageLog>,
    bus: Arc<EventBus>,
    publish: PublishContext,
    scope: ExecutionScope,
    assistant_id: i64,
    prompt: &str,
    coalesce_interval: Duration,
) -> Result<(), ExecutorError> {
    let accumulator = Arc::new(Accumulator::new());
    let handle = tokio::runtime::Handle::current();

    let schedule_flush = {
        let accumulator = Arc::clone(&accumulator);
        let message_log = Arc::clone(&message_log);
        let bus = Arc::clone(&bus);
        let publish = publish.clone();
        let handle = handle.clone();
        move |force: bool| {
            if !accumulator.should_publish(force, coalesce_interval) {
                return;
            }
            let accumulator = Arc::clone(&accumulator);
            let message_log = Arc::clone(&message_log);
            let bus = Arc::clone(&bus);
            let publish = publish.clone();
            let accumulator_for_handle = Arc::clone(&accumulator);
            let task = handle.spawn(async move {
                let snapshot = accumulator.snapshot();
                if let Err(e) = persist_and_publish(
                    &*message_log,
                    &bus,
                    &publish,
                    assistant_id,
                    &snapshot,
                    MessageStatus::Running,
                    None,
                )
                .await
                {
                    tracing::warn!(error = %e, assistant_id, "checkpoint flush failed");
                }
            });
            accumulator_for_handle.push_pending(task);
        }
    };

    let on_delta = {
        let accumulator = Arc::clone(&accumulator);
        let schedule_flush = schedule_flush.clone();
        move |delta: String| {
            accumulator.append_text(&delta);
            schedule_flush(false);
        }
    };

    let result = match runner.capability() {
        RunnerCapability::StreamWithTools(r) => {
            let accumulator = Arc::clone(&accumulator);
            let schedule_flush = schedule_flush.clone();
            let on_tool_event = move |event: ToolEvent| {
                accumulator.merge_tool_event(event);
                schedule_flush(false);
            };
            r.run_stream_with_tools(&scope, prompt, &on_delta, &on_tool_event).await
        }
        RunnerCapability::Stream(r) => r.run_stream(&scope, prompt, &on_delta).await,
        RunnerCapability::Basic(_) => unreachable!("basic runners never reach run_streaming"),
    };

    accumulator.join_pending().await;
    finalize(&*message_log, &bus, &publish, assistant_id, accumulator.snapshot(), result).await
}

async fn finalize(
    message_log: &dyn MessageLog,
    bus: &EventBus,
    publish: &PublishContext,
    assistant_id: i64,
    mut content: AssistantStructuredContent,
    result: Result<String, crate::runner::RunnerError>,
) -> Result<(), ExecutorError> {
    match result {
        Ok(reply) => {
            let trimmed = reply.trim();
            if !trimmed.is_empty() {
                content.text = trimmed.to_string();
            } else {
                content.text = content.text.trim().to_string();
            }
            persist_and_publish(message_log, bus, publish, assistant_id, &content, MessageStatus::Completed, None)
                .await?;
            Ok(())
        }
        Err(e) => {
            let error_text = e.to_string();
            let _ = persist_and_publish(
                message_log,
                bus,
                publish,
                assistant_id,
                &content,
                MessageStatus::Failed,
                Some(&error_text),
            )
            .await;
            Err(ExecutorError::RunnerFailure(error_text))
        }
    }
}
