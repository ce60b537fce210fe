//! Opaque conversation routing key (§3 of the conversation data model).
//!
//! The runtime is agnostic to what a key actually addresses — the supervisor
//! layer maps it onto either a project-manager session id or a task id.

use std::fmt;

/// A non-empty, trimmed routing key addressing a single actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Build a key from a raw string, trimming surrounding whitespace.
    ///
    /// Returns `None` if the trimmed key is empty — callers surface this as
    /// an `InvalidKey` error at admission.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
