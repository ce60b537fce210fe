//! Fan-out event bus (§4.B).
//!
//! Publishing snapshots the subscriber set under a short-held read lock,
//! then writes to each subscriber outside the lock with an independent
//! timeout. A write that times out or fails is swallowed — subscribers don't
//! observe a publish's outcome, and a slow or dead subscriber never stalls
//! the publisher or its peers.

mod envelope;
pub mod sse;

pub use envelope::EventEnvelope;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// A registered frame transport. The bus only ever writes to it; read errors
/// on the subscriber's own connection are the sole signal to unregister, and
/// that unregistration happens from outside the bus (the connection handler
/// calls `unsubscribe` once its read loop observes disconnect).
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn send_frame(&self, frame: String) -> Result<(), SubscriberError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("subscriber channel closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Whether a published event carries a task id or a session id, matching the
/// two conversation flavors (§4.F).
pub enum ConversationIdField {
    Task(String),
    Session(String),
}

struct Registration {
    id: SubscriberId,
    subscriber: Arc<dyn Subscriber>,
}

pub struct EventBus {
    seq: AtomicU64,
    next_subscriber_id: AtomicU64,
    subscribers: RwLock<Vec<Registration>>,
    write_timeout: Duration,
}

impl EventBus {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            seq: AtomicU64::new(1),
            next_subscriber_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
            write_timeout,
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.write().unwrap().push(Registration { id, subscriber });
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().unwrap().retain(|r| r.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    /// Compose and fan out an envelope. `scope_id` becomes `project_id` when
    /// non-empty; `conversation_id` becomes `task_id` or `session_id`
    /// depending on flavor, when non-empty. `extra` is merged in verbatim.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        scope_id: Option<&str>,
        conversation_id: Option<ConversationIdField>,
        extra: Map<String, Value>,
    ) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut payload = Map::new();
        if let Some(scope_id) = scope_id {
            if !scope_id.is_empty() {
                payload.insert("project_id".to_string(), json!(scope_id));
            }
        }
        match conversation_id {
            Some(ConversationIdField::Task(id)) if !id.is_empty() => {
                payload.insert("task_id".to_string(), json!(id));
            }
            Some(ConversationIdField::Session(id)) if !id.is_empty() => {
                payload.insert("session_id".to_string(), json!(id));
            }
            _ => {}
        }
        for (k, v) in extra {
            payload.insert(k, v);
        }

        let envelope = EventEnvelope {
            id: format!("evt_{seq}"),
            kind: "event".to_string(),
            op: topic.into(),
            payload: Value::Object(payload),
        };
        let frame = match serde_json::to_string(&envelope) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event envelope");
                return;
            }
        };

        self.fanout(frame).await;
    }

    async fn fanout(&self, frame: String) {
        let snapshot: Vec<Arc<dyn Subscriber>> = {
            let subs = self.subscribers.read().unwrap();
            subs.iter().map(|r| Arc::clone(&r.subscriber)).collect()
        };
        for subscriber in snapshot {
            match tokio::time::timeout(self.write_timeout, subscriber.send_frame(frame.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "subscriber write failed"),
                Err(_) => tracing::debug!("subscriber write timed out after {:?}", self.write_timeout),
            }
        }
    }
}
