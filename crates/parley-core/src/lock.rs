//! Thread lock domain model.
//!
//! A thread is the unit of lock granularity: at most one live
//! (non-expired) lock exists per thread, and the store layer enforces
//! that uniqueness atomically. Expiry is the deadlock-prevention
//! mechanism — a holder that crashes without releasing simply ages out.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What the lock holder is doing with the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// A human participant is composing or sending a message.
    Producer,
    /// An automated responder is generating a reply.
    Responder,
}

/// Exclusive lock row for one conversation thread.
///
/// A lock past `expires_at` is treated as absent by every operation that
/// reads it; liveness is always evaluated against the current time,
/// never a cached read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadLock {
    /// The serialized resource.
    pub thread_id: String,
    /// Participant (human or responder) currently holding the lock.
    pub holder_id: String,
    /// Purpose of the hold.
    pub kind: LockKind,
    /// Absolute deadline after which the lock is logically absent.
    pub expires_at: DateTime<Utc>,
}

impl ThreadLock {
    /// Creates a lock expiring `ttl` after `now`.
    pub fn new(
        thread_id: impl Into<String>,
        holder_id: impl Into<String>,
        kind: LockKind,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            holder_id: holder_id.into(),
            kind,
            expires_at: now + ttl,
        }
    }

    /// Whether the lock is still live at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whether `holder_id` holds this lock.
    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }

    /// Remaining lifetime in whole seconds, clamped to at least 1.
    ///
    /// Used as the `retry_after` hint handed to a conflicting caller.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(1)
    }
}
