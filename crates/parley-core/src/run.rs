//! Streaming run domain model.
//!
//! A `StreamingRun` is one execution of the orchestration state machine:
//! it accumulates the partial response text that real-time clients follow
//! through store change notifications, and terminates exactly once as
//! either `Complete` (with a permanent message record) or `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Run row created, generation not yet started.
    Initializing,
    /// Increments are being drained from the completion source.
    Streaming,
    /// Terminated with a permanent message record.
    Complete,
    /// Terminated without producing a message.
    Failed,
}

/// One in-flight response generation.
///
/// `content` grows monotonically while the run is active and never
/// shrinks. `final_record_id` is set only together with
/// `RunState::Complete`, in the same row write, so a completed run is
/// never observable without its permanent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingRun {
    /// Identity of this run.
    pub id: String,
    /// Room the thread belongs to; scopes roster lookups.
    pub room_id: String,
    /// Thread being responded to.
    pub thread_id: String,
    /// Responder generating the reply.
    pub responder_id: String,
    /// The user message this run responds to.
    pub source_message_id: String,
    /// Accumulated response text so far.
    pub content: String,
    /// Current lifecycle state.
    pub state: RunState,
    /// Permanent message id, set only when `state` is `Complete`.
    pub final_record_id: Option<String>,
    /// Failure reason, set only when `state` is `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamingRun {
    /// Creates a fresh `Initializing` run with empty content.
    pub fn new(
        room_id: impl Into<String>,
        thread_id: impl Into<String>,
        responder_id: impl Into<String>,
        source_message_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            thread_id: thread_id.into(),
            responder_id: responder_id.into(),
            source_message_id: source_message_id.into(),
            content: String::new(),
            state: RunState::Initializing,
            final_record_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the run is still active (`Initializing` or `Streaming`).
    pub fn is_active(&self) -> bool {
        matches!(self.state, RunState::Initializing | RunState::Streaming)
    }
}
