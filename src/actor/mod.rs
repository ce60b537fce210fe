//! Keyed actor runtime (§4.A).
//!
//! One bounded FIFO queue and one dedicated single-consumer worker per key,
//! created lazily on first use and never reclaimed. Generalizes the
//! teacher's single global control session (`api::control::control_actor_loop`)
//! and per-mission queue (`api::mission_runner::MissionRunner`) into one
//! worker per arbitrary key, addressed by `ConversationKey` instead of a
//! fixed session or mission id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ActorError;
use crate::key::ConversationKey;
use crate::scope::RuntimeScope;

/// An event destined for a single key's queue.
pub struct Event<P> {
    pub key: String,
    pub payload: P,
}

/// Per-key event handler. The runtime ignores whatever a handler does
/// internally — errors are the handler's own business to log and recover
/// from; the worker loop moves on to the next event regardless.
#[async_trait]
pub trait Handler<P>: Send + Sync
where
    P: Send + 'static,
{
    async fn handle(&self, scope: RuntimeScope, payload: P);
}

struct ActorEntry<P> {
    tx: mpsc::Sender<P>,
    queued: AtomicUsize,
    inflight: Mutex<Option<CancellationToken>>,
}

/// Dispatches events to independent single-consumer queues addressed by an
/// opaque key. Strict FIFO within a key; no ordering guarantee across keys.
pub struct ActorRuntime<P>
where
    P: Send + 'static,
{
    queue_capacity: usize,
    entries: Mutex<HashMap<ConversationKey, Arc<ActorEntry<P>>>>,
    handler: Arc<dyn Handler<P>>,
}

impl<P> ActorRuntime<P>
where
    P: Send + 'static,
{
    pub fn new(queue_capacity: usize, handler: Arc<dyn Handler<P>>) -> Self {
        Self {
            queue_capacity,
            entries: Mutex::new(HashMap::new()),
            handler,
        }
    }

    /// Enqueue an event. Validates and trims the key, lazily creating the
    /// worker for it if this is its first appearance. `ctx` is the caller's
    /// own cancellation signal — if it fires while the queue is full, the
    /// enqueue aborts with `Cancelled` instead of waiting forever.
    pub async fn enqueue(&self, ctx: &CancellationToken, event: Event<P>) -> Result<(), ActorError> {
        let key = ConversationKey::new(&event.key).ok_or(ActorError::InvalidKey)?;
        let entry = self.get_or_create_entry(key);
        entry.queued.fetch_add(1, Ordering::SeqCst);

        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                entry.queued.fetch_sub(1, Ordering::SeqCst);
                Err(ActorError::Cancelled)
            }
            res = entry.tx.send(event.payload) => {
                res.map_err(|_| ActorError::RuntimeUnavailable)
            }
        }
    }

    /// Number of events waiting in a key's queue, excluding one currently
    /// being handled.
    pub fn queue_len(&self, key: &ConversationKey) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|e| e.queued.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Cancel the event currently in flight for a key, if any. A no-op if
    /// the key has no worker or nothing is running.
    pub fn cancel(&self, key: &ConversationKey) {
        let entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if let Some(token) = entry.inflight.lock().unwrap().as_ref() {
                token.cancel();
            }
        }
    }

    fn get_or_create_entry(&self, key: ConversationKey) -> Arc<ActorEntry<P>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(&key) {
            return Arc::clone(entry);
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let entry = Arc::new(ActorEntry {
            tx,
            queued: AtomicUsize::new(0),
            inflight: Mutex::new(None),
        });
        entries.insert(key.clone(), Arc::clone(&entry));

        let worker_entry = Arc::clone(&entry);
        let handler = Arc::clone(&self.handler);
        tokio::spawn(worker_loop(key, rx, worker_entry, handler));

        entry
    }
}

async fn worker_loop<P>(key: ConversationKey, mut rx: mpsc::Receiver<P>, entry: Arc<ActorEntry<P>>, handler: Arc<dyn Handler<P>>)
where
    P: Send + 'static,
{
    while let Some(payload) = rx.recv().await {
        entry.queued.fetch_sub(1, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        *entry.inflight.lock().unwrap() = Some(cancel.clone());

        tracing::debug!(key = %key, "actor dispatching event");
        handler.handle(RuntimeScope::new(cancel), payload).await;
        tracing::debug!(key = %key, "actor finished event");

        *entry.inflight.lock().unwrap() = None;
    }
}
