//! In-memory permanent message storage.

use std::sync::Mutex;

use async_trait::async_trait;
use parley_core::message::Message;
use parley_core::store::MessageStore;
use parley_core::{ParleyError, Result};

use super::lock_rows;

/// Append-only message table. Insertion order is chronological, which
/// keeps `list_recent` stable even when timestamps collide.
#[derive(Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: &Message) -> Result<()> {
        let mut rows = lock_rows(&self.rows);
        if rows.iter().any(|existing| existing.id == message.id) {
            return Err(ParleyError::store(format!(
                "duplicate message id '{}'",
                message.id
            )));
        }
        tracing::debug!("inserting message {} in thread {}", message.id, message.thread_id);
        rows.push(message.clone());
        Ok(())
    }

    async fn find_by_id(&self, message_id: &str) -> Result<Option<Message>> {
        Ok(lock_rows(&self.rows)
            .iter()
            .find(|message| message.id == message_id)
            .cloned())
    }

    async fn list_recent(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>> {
        Ok(lock_rows(&self.rows)
            .iter()
            .rev()
            .filter(|message| message.thread_id == thread_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
