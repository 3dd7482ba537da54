//! Permanent message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    /// A human participant.
    Human,
    /// An automated responder.
    Responder,
}

/// A permanent conversation message. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub thread_id: String,
    pub content: String,
    pub sender_kind: SenderKind,
    pub sender_id: String,
    /// The message this one replies to, if any.
    pub in_reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message with a fresh id and the current timestamp.
    pub fn new(
        room_id: impl Into<String>,
        thread_id: impl Into<String>,
        content: impl Into<String>,
        sender_kind: SenderKind,
        sender_id: impl Into<String>,
        in_reply_to: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            thread_id: thread_id.into(),
            content: content.into(),
            sender_kind,
            sender_id: sender_id.into(),
            in_reply_to,
            created_at: Utc::now(),
        }
    }
}
