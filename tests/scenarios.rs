//! End-to-end coverage of the runtime's documented testable properties,
//! exercised against the public API rather than any module's internals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use turn_runtime::actor::{ActorRuntime, Event, Handler};
use turn_runtime::history::{self, HistoryOptions};
use turn_runtime::message_log::InMemoryMessageLog;
use turn_runtime::runner::{Runner, RunnerCapability, RunnerError, StreamingEchoRunner};
use turn_runtime::scope::{ExecutionScope, RuntimeScope};
use turn_runtime::supervisor::{ConversationSupervisor, TurnRequest};
use turn_runtime::tool_policy::{self, ToolPolicy};
use turn_runtime::{AssistantStructuredContent, MessageLog, MessageStatus, Role};

struct TrackingHandler {
    hold: Duration,
    started: Mutex<Vec<(String, Instant)>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl TrackingHandler {
    fn new(hold: Duration) -> Self {
        Self {
            hold,
            started: Mutex::new(Vec::new()),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Handler<u32> for TrackingHandler {
    async fn handle(&self, scope: RuntimeScope, payload: u32) {
        self.started.lock().unwrap().push((payload.to_string(), Instant::now()));
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.hold) => {}
            _ = scope.cancelled() => {}
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }
}

// Scenario 1: serialized same-key.
#[tokio::test]
async fn serialized_same_key_runs_one_at_a_time() {
    let handler = Arc::new(TrackingHandler::new(Duration::from_millis(40)));
    let runtime = ActorRuntime::new(8, Arc::clone(&handler) as Arc<dyn Handler<u32>>);

    runtime.enqueue(&CancellationToken::new(), Event { key: "k1".to_string(), payload: 1 }).await.unwrap();
    runtime.enqueue(&CancellationToken::new(), Event { key: "k1".to_string(), payload: 2 }).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handler.max_concurrent.load(Ordering::SeqCst), 1);
    assert_eq!(handler.started.lock().unwrap().len(), 2);
}

// Scenario 2: parallel different keys.
#[tokio::test]
async fn parallel_different_keys_overlap() {
    let handler = Arc::new(TrackingHandler::new(Duration::from_millis(80)));
    let runtime = Arc::new(ActorRuntime::new(8, Arc::clone(&handler) as Arc<dyn Handler<u32>>));

    for key in ["a", "b"] {
        let runtime = Arc::clone(&runtime);
        let key = key.to_string();
        tokio::spawn(async move {
            runtime.enqueue(&CancellationToken::new(), Event { key, payload: 1 }).await.unwrap();
        });
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    let started = handler.started.lock().unwrap();
    let keys: Vec<&str> = started.iter().map(|(k, _)| k.as_str()).collect();
    assert!(handler.max_concurrent.load(Ordering::SeqCst) >= 2);
    assert_eq!(keys.len(), 2);
}

// Scenario 3: cancel inflight.
#[tokio::test]
async fn cancel_signals_inflight_handler_within_bound() {
    struct BlockingHandler {
        cancelled: Arc<tokio::sync::Notify>,
    }
    #[async_trait]
    impl Handler<()> for BlockingHandler {
        async fn handle(&self, scope: RuntimeScope, _payload: ()) {
            scope.cancelled().await;
            self.cancelled.notify_one();
        }
    }

    let cancelled = Arc::new(tokio::sync::Notify::new());
    let handler = Arc::new(BlockingHandler { cancelled: Arc::clone(&cancelled) });
    let runtime = ActorRuntime::new(8, handler as Arc<dyn Handler<()>>);

    runtime.enqueue(&CancellationToken::new(), Event { key: "cancel-key".to_string(), payload: () }).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let key = turn_runtime::ConversationKey::new("cancel-key").unwrap();
    runtime.cancel(&key);

    tokio::time::timeout(Duration::from_secs(2), cancelled.notified()).await.expect("cancellation observed in time");
}

// Scenario 4: history overflow.
#[test]
fn history_overflow_wraps_with_summary_and_respects_budgets() {
    let messages: Vec<turn_runtime::Message> = (0..120)
        .map(|i| turn_runtime::Message {
            id: i,
            conversation_key: "conv-1".to_string(),
            role: Role::User,
            content: "x".repeat(120),
            status: MessageStatus::Completed,
            error_text: None,
        })
        .collect();
    let opts = HistoryOptions { max_messages: 30, max_chars: 2000, message_clamp_chars: 360 };
    let (output, meta) = history::build(&messages, &opts);

    assert!(output.contains("history_summary:"));
    assert!(output.contains("recent_history:"));
    assert!(meta.dropped > 0);
    assert!(meta.included <= 30);
    assert_eq!(meta.output_chars, output.len());
}

// Scenario 5: tool parity filter.
#[test]
fn tool_parity_filter_strips_write_and_network_tools() {
    let base = tool_policy::codex_parity_profile();
    let policy = ToolPolicy { deny_write: true, deny_network: true, deny_planning: false };
    let resolved = tool_policy::resolve_allowed_tools(&base, &policy);

    assert!(!resolved.contains(&"apply_patch".to_string()));
    assert!(!resolved.contains(&"write_stdin".to_string()));
    assert!(resolved.iter().all(|name| !name.starts_with("web.")));
}

// Scenario 6: streaming structured content persists merged tool records.
#[tokio::test]
async fn streaming_turn_persists_merged_structured_content() {
    let log = Arc::new(InMemoryMessageLog::new());
    log.register_session("conv-1", "scope-1");
    let bus = Arc::new(turn_runtime::bus::EventBus::new(Duration::from_millis(500)));
    let runner: Arc<dyn Runner> = Arc::new(StreamingEchoRunner::new("stream reply"));
    let supervisor = ConversationSupervisor::project_manager(
        Arc::clone(&log) as Arc<dyn MessageLog>,
        bus,
        runner,
        turn_runtime::Config::default(),
        None,
    );

    supervisor
        .submit(
            &CancellationToken::new(),
            TurnRequest {
                conversation_key: "conv-1".to_string(),
                scope_id: "scope-1".to_string(),
                source: "user_input".to_string(),
                display_content: String::new(),
                agent_prompt: String::new(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    let messages = log.list_messages("conv-1", 10).await.unwrap();
    let assistant = messages.iter().find(|m| m.role == Role::Assistant).unwrap();
    assert_eq!(assistant.status, MessageStatus::Completed);
    let content: AssistantStructuredContent = serde_json::from_str(&assistant.content).unwrap();
    assert_eq!(content.text, "stream reply");
    assert_eq!(content.tools.len(), 1);
    assert_eq!(content.tools[0].tool_name, "echo");
}

// Scenario 7: second-turn history injection. The composed prompt is the
// caller's responsibility (§4.D is a pure function, not auto-wired into
// agentPrompt); this exercises that composition end-to-end through the
// supervisor with a runner that records exactly what it was handed.
struct CapturingRunner {
    last_prompt: Mutex<Option<String>>,
}

impl CapturingRunner {
    fn new() -> Self {
        Self { last_prompt: Mutex::new(None) }
    }
}

#[async_trait]
impl turn_runtime::runner::RunBasic for CapturingRunner {
    async fn run(&self, _scope: &ExecutionScope, prompt: &str) -> Result<String, RunnerError> {
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        Ok("ack-first".to_string())
    }
}

impl Runner for CapturingRunner {
    fn capability(&self) -> RunnerCapability<'_> {
        RunnerCapability::Basic(self)
    }
}

#[tokio::test]
async fn second_turn_prompt_carries_first_turns_history() {
    let log = Arc::new(InMemoryMessageLog::new());
    log.register_session("conv-1", "scope-1");
    let bus = Arc::new(turn_runtime::bus::EventBus::new(Duration::from_millis(500)));
    let runner = Arc::new(CapturingRunner::new());
    let supervisor = ConversationSupervisor::project_manager(
        Arc::clone(&log) as Arc<dyn MessageLog>,
        bus,
        Arc::clone(&runner) as Arc<dyn Runner>,
        turn_runtime::Config::default(),
        None,
    );

    supervisor
        .submit(
            &CancellationToken::new(),
            TurnRequest {
                conversation_key: "conv-1".to_string(),
                scope_id: "scope-1".to_string(),
                source: "user_input".to_string(),
                display_content: "first sentence".to_string(),
                agent_prompt: String::new(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let prior = log.list_messages("conv-1", 80).await.unwrap();
    let (history_block, _meta) = history::build(&prior, &HistoryOptions::default());
    let second_prompt = format!("conversation_history:\n{history_block}\n\nnew message: second sentence");

    supervisor
        .submit(
            &CancellationToken::new(),
            TurnRequest {
                conversation_key: "conv-1".to_string(),
                scope_id: "scope-1".to_string(),
                source: "user_input".to_string(),
                display_content: "second sentence".to_string(),
                agent_prompt: second_prompt,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let handed_prompt = runner.last_prompt.lock().unwrap().clone().unwrap();
    assert!(handed_prompt.contains("conversation_history:"));
    assert!(handed_prompt.contains("first sentence"));
    assert!(handed_prompt.contains("ack-first"));
}
