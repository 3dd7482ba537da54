//! Stream accumulator.
//!
//! Buffers increments from the completion source and batches them into
//! periodic durable writes instead of writing per increment. Downstream
//! clients get one change notification per write, so the threshold
//! bounds added latency while keeping per-character streaming from
//! turning into a notification storm.

use std::sync::Arc;

use chrono::Utc;
use parley_core::Result;
use parley_core::message::{Message, SenderKind};
use parley_core::run::{RunState, StreamingRun};
use parley_core::store::{MessageStore, RunStore};

/// Accumulates one run's streamed content. Single-writer: owned by the
/// run that created it.
pub struct StreamAccumulator {
    runs: Arc<dyn RunStore>,
    messages: Arc<dyn MessageStore>,
    run: StreamingRun,
    /// Characters appended since the last durable write.
    pending_chars: usize,
    flush_threshold: usize,
}

impl StreamAccumulator {
    pub fn new(
        runs: Arc<dyn RunStore>,
        messages: Arc<dyn MessageStore>,
        run: StreamingRun,
        flush_threshold: usize,
    ) -> Self {
        Self {
            runs,
            messages,
            run,
            pending_chars: 0,
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// The run this accumulator is feeding.
    pub fn run(&self) -> &StreamingRun {
        &self.run
    }

    /// Moves the run to `Streaming` and persists the transition.
    pub async fn mark_streaming(&mut self) -> Result<()> {
        self.run.state = RunState::Streaming;
        self.flush().await
    }

    /// Appends a delta, flushing to the store once the unflushed portion
    /// crosses the threshold. Returns the total accumulated length.
    pub async fn append(&mut self, delta: &str) -> Result<usize> {
        self.run.content.push_str(delta);
        self.pending_chars += delta.chars().count();

        if self.pending_chars >= self.flush_threshold {
            self.flush().await?;
        }
        Ok(self.run.content.chars().count())
    }

    /// Terminates the run successfully: writes the permanent message and
    /// marks the run `Complete` with `final_record_id` in the same row
    /// write, so a completed run is never visible without its record.
    pub async fn finalize(&mut self) -> Result<Message> {
        let message = Message::new(
            self.run.room_id.clone(),
            self.run.thread_id.clone(),
            self.run.content.clone(),
            SenderKind::Responder,
            self.run.responder_id.clone(),
            Some(self.run.source_message_id.clone()),
        );
        self.messages.insert(&message).await?;

        self.run.state = RunState::Complete;
        self.run.final_record_id = Some(message.id.clone());
        self.flush().await?;

        tracing::info!(
            "run {} complete: {} chars -> message {}",
            self.run.id,
            self.run.content.chars().count(),
            message.id
        );
        Ok(message)
    }

    /// Terminates the run as failed. No permanent message is created.
    pub async fn fail(&mut self, reason: &str) -> Result<()> {
        self.run.state = RunState::Failed;
        self.run.error = Some(reason.to_string());
        self.flush().await?;

        tracing::warn!("run {} failed: {}", self.run.id, reason);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.run.updated_at = Utc::now();
        self.runs.save(&self.run).await?;
        self.pending_chars = 0;
        Ok(())
    }
}
