//! Store traits.
//!
//! These traits are the only surface through which the coordination layer
//! touches durable state. All coordination across service instances
//! happens through the store — no in-process structure is authoritative.
//!
//! Every operation on `LockStore` that writes is a single atomic
//! read-modify-write: two concurrent guarded upserts for the same thread
//! must yield exactly one grant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lock::{LockKind, ThreadLock};
use crate::message::Message;
use crate::responder::Responder;
use crate::run::{RunState, StreamingRun};

/// Which existing rows a guarded lock upsert may rewrite.
///
/// A live row is replaced only when it matches `expected_holder` (and
/// `expected_kind`, when set). A vacant or expired slot is writable only
/// when `allow_vacant` is true.
#[derive(Debug, Clone)]
pub struct LockGuard {
    /// Holder whose live row may be rewritten.
    pub expected_holder: String,
    /// Restrict the rewrite to live rows of this kind; `None` matches any.
    pub expected_kind: Option<LockKind>,
    /// Whether a vacant or expired slot counts as writable.
    pub allow_vacant: bool,
}

impl LockGuard {
    /// Guard for acquisition paths: the caller's own live row of `kind`
    /// may be rewritten, and a vacant or expired slot is free to take.
    pub fn reentrant(holder: impl Into<String>, kind: LockKind) -> Self {
        Self {
            expected_holder: holder.into(),
            expected_kind: Some(kind),
            allow_vacant: true,
        }
    }
}

/// Outcome of a guarded lock write.
#[derive(Debug, Clone)]
pub enum LockAttempt {
    /// The write was applied; the stored row is returned.
    Granted(ThreadLock),
    /// A live row blocked the write.
    Conflict(ThreadLock),
    /// No live row existed and the guard required one.
    Vacant,
}

/// Atomic row operations against the shared lock table.
///
/// This is the only place strong consistency is required. A SQL-backed
/// implementation expresses each write as one conditional
/// INSERT/UPDATE/DELETE; the in-memory implementation runs each write
/// under a single mutex acquisition. Liveness is always evaluated against
/// the `now` passed in, inside the atomic operation.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Returns the current row for `thread_id`, expired or not.
    async fn get(&self, thread_id: &str) -> Result<Option<ThreadLock>>;

    /// Atomically writes `lock` when `guard` permits it.
    async fn upsert_guarded(
        &self,
        lock: ThreadLock,
        guard: LockGuard,
        now: DateTime<Utc>,
    ) -> Result<LockAttempt>;

    /// Atomically pushes back `expires_at` when the row is live at `now`
    /// and held by `holder_id`. Returns the extended row, or `None` when
    /// the row is vacant, expired, or held by someone else.
    async fn extend_if_held(
        &self,
        thread_id: &str,
        holder_id: &str,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ThreadLock>>;

    /// Deletes the row when held by `holder_id`. Returns whether a row
    /// was removed; absent or foreign rows are a no-op.
    async fn delete_if_held(&self, thread_id: &str, holder_id: &str) -> Result<bool>;
}

/// Row-level change notification published on every run write.
///
/// Delivery is fire-and-forget and at-least-once; receivers may lag and
/// miss intermediate states, which is why the terminal state is
/// idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunChange {
    pub run_id: String,
    pub thread_id: String,
    pub state: RunState,
    /// Length of the accumulated content at publication time.
    pub content_len: usize,
}

/// Upsert-style storage for streaming runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Creates or updates the row keyed by `run.id` and publishes a
    /// change notification for it.
    async fn save(&self, run: &StreamingRun) -> Result<()>;

    /// Finds a run by its id.
    async fn find_by_id(&self, run_id: &str) -> Result<Option<StreamingRun>>;

    /// Lists runs for `thread_id` that are still active
    /// (`Initializing` or `Streaming`).
    async fn list_active(&self, thread_id: &str) -> Result<Vec<StreamingRun>>;
}

/// Append-only storage for permanent messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Inserts a message. Write-once: a duplicate id is an error.
    async fn insert(&self, message: &Message) -> Result<()>;

    /// Finds a message by its id.
    async fn find_by_id(&self, message_id: &str) -> Result<Option<Message>>;

    /// Returns up to `limit` messages for `thread_id`, newest first.
    async fn list_recent(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>>;
}

/// Read access to responder configuration and room membership.
#[async_trait]
pub trait ResponderDirectory: Send + Sync {
    /// Finds a responder by its id.
    async fn find_by_id(&self, responder_id: &str) -> Result<Option<Responder>>;

    /// Lists the responders actively registered to a room.
    async fn list_active_in_room(&self, room_id: &str) -> Result<Vec<Responder>>;
}
