//! In-memory streaming run storage with change notifications.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use parley_core::Result;
use parley_core::run::StreamingRun;
use parley_core::store::{RunChange, RunStore};
use tokio::sync::broadcast;

use super::lock_rows;

/// Capacity of the change-notification channel. Receivers that lag past
/// this many events drop the oldest ones, which is within the
/// at-least-once, no-ordering contract of the notification surface.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Mutex-backed run table that publishes a `RunChange` on every save,
/// the way a relational store with row-level realtime notifications
/// would.
pub struct MemoryRunStore {
    rows: Mutex<HashMap<String, StreamingRun>>,
    changes: broadcast::Sender<RunChange>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            rows: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Subscribes to row change notifications. Notifications sent before
    /// the subscription are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<RunChange> {
        self.changes.subscribe()
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, run: &StreamingRun) -> Result<()> {
        tracing::debug!(
            "saving run {} in state {:?} ({} chars)",
            run.id,
            run.state,
            run.content.chars().count()
        );
        lock_rows(&self.rows).insert(run.id.clone(), run.clone());

        // Fire-and-forget: no subscribers is fine.
        let _ = self.changes.send(RunChange {
            run_id: run.id.clone(),
            thread_id: run.thread_id.clone(),
            state: run.state,
            content_len: run.content.chars().count(),
        });
        Ok(())
    }

    async fn find_by_id(&self, run_id: &str) -> Result<Option<StreamingRun>> {
        Ok(lock_rows(&self.rows).get(run_id).cloned())
    }

    async fn list_active(&self, thread_id: &str) -> Result<Vec<StreamingRun>> {
        Ok(lock_rows(&self.rows)
            .values()
            .filter(|run| run.thread_id == thread_id && run.is_active())
            .cloned()
            .collect())
    }
}
