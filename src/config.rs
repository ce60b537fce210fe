//! Tunable limits and timings (§4.J).
//!
//! Precedence, loosest to tightest: built-in defaults, overlaid by a YAML
//! file if one is supplied, overlaid by explicit builder setters. Mirrors the
//! file-with-defaults pattern `backend_config.rs` uses for on-disk config,
//! adapted to YAML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub actor_queue_capacity: usize,
    pub publish_coalesce_interval_ms: u64,
    pub subscriber_write_timeout_ms: u64,
    pub history_max_messages: usize,
    pub history_max_chars: usize,
    pub history_message_clamp_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            actor_queue_capacity: 64,
            publish_coalesce_interval_ms: 120,
            subscriber_write_timeout_ms: 500,
            history_max_messages: 80,
            history_max_chars: 12_000,
            history_message_clamp_chars: 360,
        }
    }
}

impl Config {
    pub fn publish_coalesce_interval(&self) -> Duration {
        Duration::from_millis(self.publish_coalesce_interval_ms)
    }

    pub fn subscriber_write_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_write_timeout_ms)
    }

    /// Load a YAML file and overlay it onto the defaults. A missing file is
    /// not an error — callers that don't have one yet get plain defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let parsed: Config = serde_yaml::from_str(&contents)?;
        Ok(parsed)
    }

    /// Overlay well-known `TURN_RUNTIME_*` environment variables onto
    /// whatever `self` currently holds. Unset or unparsable variables are
    /// left untouched rather than treated as errors.
    pub fn overlay_env(mut self) -> Self {
        if let Some(v) = env_usize("TURN_RUNTIME_ACTOR_QUEUE_CAPACITY") {
            self.actor_queue_capacity = v;
        }
        if let Some(v) = env_u64("TURN_RUNTIME_PUBLISH_COALESCE_INTERVAL_MS") {
            self.publish_coalesce_interval_ms = v;
        }
        if let Some(v) = env_u64("TURN_RUNTIME_SUBSCRIBER_WRITE_TIMEOUT_MS") {
            self.subscriber_write_timeout_ms = v;
        }
        if let Some(v) = env_usize("TURN_RUNTIME_HISTORY_MAX_MESSAGES") {
            self.history_max_messages = v;
        }
        if let Some(v) = env_usize("TURN_RUNTIME_HISTORY_MAX_CHARS") {
            self.history_max_chars = v;
        }
        if let Some(v) = env_usize("TURN_RUNTIME_HISTORY_MESSAGE_CLAMP_CHARS") {
            self.history_message_clamp_chars = v;
        }
        self
    }

    /// Defaults overlaid with environment variables, skipping any file.
    pub fn from_env_or_default() -> Self {
        Self::default().overlay_env()
    }

    pub fn with_actor_queue_capacity(mut self, capacity: usize) -> Self {
        self.actor_queue_capacity = capacity;
        self
    }

    pub fn with_history_max_messages(mut self, max: usize) -> Self {
        self.history_max_messages = max;
        self
    }

    pub fn with_history_max_chars(mut self, max: usize) -> Self {
        self.history_max_chars = max;
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_limits() {
        let cfg = Config::default();
        assert_eq!(cfg.actor_queue_capacity, 64);
        assert_eq!(cfg.publish_coalesce_interval(), Duration::from_millis(120));
        assert_eq!(cfg.subscriber_write_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.history_max_messages, 80);
        assert_eq!(cfg.history_max_chars, 12_000);
        assert_eq!(cfg.history_message_clamp_chars, 360);
    }

    #[test]
    fn missing_yaml_file_falls_back_to_defaults() {
        let path = Path::new("/nonexistent/turn-runtime-config.yaml");
        let cfg = Config::from_yaml_file(path).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn yaml_file_overlays_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "actor_queue_capacity: 128\n").unwrap();
        let cfg = Config::from_yaml_file(&path).unwrap();
        assert_eq!(cfg.actor_queue_capacity, 128);
        assert_eq!(cfg.history_max_messages, 80);
    }

    #[test]
    fn builder_setters_override_in_place() {
        let cfg = Config::default().with_actor_queue_capacity(8).with_history_max_messages(10);
        assert_eq!(cfg.actor_queue_capacity, 8);
        assert_eq!(cfg.history_max_messages, 10);
    }
}
