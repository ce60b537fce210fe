//! Optional inflight registry (§4.I).
//!
//! Lets an external caller stop a running turn by conversation key directly,
//! without routing through the actor runtime (which only exposes `cancel`
//! for keys it already has a worker for — the same operation, but this
//! registry also hands back the assistant message id so the caller can
//! persist a terminal status afterward). Stopping a turn never persists
//! anything itself; it only flips the scope's cancellation token.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

struct Entry {
    assistant_message_id: i64,
    cancel: CancellationToken,
}

/// Mutex-protected conversation-key → in-flight-turn mapping.
pub struct InflightRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Record that a turn for `key` has started. Call at the same point the
    /// supervisor attaches the execution scope to the runner (§4.F step 4).
    pub fn start(&self, key: impl Into<String>, assistant_message_id: i64, cancel: CancellationToken) {
        self.entries.lock().unwrap().insert(key.into(), Entry { assistant_message_id, cancel });
    }

    /// Remove `key`'s entry without cancelling it. Call once the turn
    /// reaches a terminal status, successful or not.
    pub fn clear(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Pop and cancel the in-flight turn for `key`, if any. Returns the
    /// assistant message id the caller should mark terminal (typically
    /// `failed` with `"stopped"`) and whether a turn was actually found.
    pub fn stop(&self, key: &str) -> (Option<i64>, bool) {
        match self.entries.lock().unwrap().remove(key) {
            Some(entry) => {
                entry.cancel.cancel();
                (Some(entry.assistant_message_id), true)
            }
            None => (None, false),
        }
    }
}

impl Default for InflightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_pops_entry_and_cancels_token() {
        let registry = InflightRegistry::new();
        let token = CancellationToken::new();
        registry.start("conv-1", 42, token.clone());

        let (id, stopped) = registry.stop("conv-1");
        assert_eq!(id, Some(42));
        assert!(stopped);
        assert!(token.is_cancelled());

        let (id, stopped) = registry.stop("conv-1");
        assert_eq!(id, None);
        assert!(!stopped);
    }

    #[test]
    fn stop_on_unknown_key_is_a_no_op() {
        let registry = InflightRegistry::new();
        let (id, stopped) = registry.stop("missing");
        assert_eq!(id, None);
        assert!(!stopped);
    }

    #[test]
    fn clear_removes_without_cancelling() {
        let registry = InflightRegistry::new();
        let token = CancellationToken::new();
        registry.start("conv-1", 1, token.clone());
        registry.clear("conv-1");
        assert!(!token.is_cancelled());
        let (_, stopped) = registry.stop("conv-1");
        assert!(!stopped);
    }
}
