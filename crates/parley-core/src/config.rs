//! Coordination tunables.
//!
//! The batching threshold and TTL windows are configuration, not protocol
//! invariants; the defaults here match the deployed service.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tunable constants for the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// TTL for `Producer` locks, in seconds.
    #[serde(default = "default_producer_ttl_secs")]
    pub producer_ttl_secs: i64,
    /// TTL for `Responder` locks, in seconds. Longer than the producer
    /// window since generation may run long.
    #[serde(default = "default_responder_ttl_secs")]
    pub responder_ttl_secs: i64,
    /// Unflushed character count that triggers a durable write of the
    /// accumulated stream content.
    #[serde(default = "default_flush_threshold_chars")]
    pub flush_threshold_chars: usize,
    /// How many recent messages are folded into the prompt context.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_producer_ttl_secs() -> i64 {
    30
}

fn default_responder_ttl_secs() -> i64 {
    120
}

fn default_flush_threshold_chars() -> usize {
    50
}

fn default_history_window() -> usize {
    10
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            producer_ttl_secs: default_producer_ttl_secs(),
            responder_ttl_secs: default_responder_ttl_secs(),
            flush_threshold_chars: default_flush_threshold_chars(),
            history_window: default_history_window(),
        }
    }
}

impl CoordinationConfig {
    /// TTL applied to `Producer` locks.
    pub fn producer_ttl(&self) -> Duration {
        Duration::seconds(self.producer_ttl_secs)
    }

    /// TTL applied to `Responder` locks.
    pub fn responder_ttl(&self) -> Duration {
        Duration::seconds(self.responder_ttl_secs)
    }

    /// How often a streaming run refreshes its lock: half the responder
    /// TTL, so a healthy run never false-expires.
    pub fn refresh_interval(&self) -> std::time::Duration {
        let half = (self.responder_ttl_secs.max(2) as u64) / 2;
        std::time::Duration::from_secs(half)
    }
}
