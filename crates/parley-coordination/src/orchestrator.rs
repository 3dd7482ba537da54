//! Orchestration state machine.
//!
//! Drives one response generation run end-to-end: transition the thread
//! lock to the responder, retire stale runs, assemble context, drain the
//! completion source through the accumulator, finalize, release the
//! lock, and — for moderators — hand the final text to the chainer.
//!
//! `start` only waits for lock acquisition; generation happens on a
//! spawned task with its own cancellation token. Provider and store
//! errors terminate only the run they belong to; the caller retries by
//! issuing a fresh request.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use parley_core::completion::{CompletionSource, GenerationContext};
use parley_core::config::CoordinationConfig;
use parley_core::message::Message;
use parley_core::responder::Responder;
use parley_core::run::{RunState, StreamingRun};
use parley_core::store::{MessageStore, ResponderDirectory, RunStore};
use parley_core::{ParleyError, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::accumulator::StreamAccumulator;
use crate::context;
use crate::lock::{LockCoordinator, RefreshOutcome};
use crate::moderation::ModeratorChainer;

/// An already-validated request to generate one response.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub room_id: String,
    pub thread_id: String,
    pub responder_id: String,
    /// The already-saved user message this run responds to.
    pub user_message_id: String,
}

/// Handle returned by `start` while generation continues in the
/// background. Existence of a ticket means the run is processing.
#[derive(Debug)]
pub struct RunTicket {
    pub run_id: String,
    /// Cancels the run; cleanup (run marked failed, lock released) still
    /// executes.
    pub cancel: CancellationToken,
    /// Completion of the background drive task.
    pub handle: JoinHandle<()>,
}

/// How one drive loop ended, before lock release.
enum RunOutcome {
    Completed(Message),
    Failed,
    /// The lock expired and may have changed hands; it is not ours to
    /// release.
    LockLost,
}

/// Coordinates streaming runs for conversation threads.
pub struct Orchestrator {
    locks: Arc<LockCoordinator>,
    runs: Arc<dyn RunStore>,
    messages: Arc<dyn MessageStore>,
    responders: Arc<dyn ResponderDirectory>,
    source: Arc<dyn CompletionSource>,
    chainer: ModeratorChainer,
    config: CoordinationConfig,
}

impl Orchestrator {
    pub fn new(
        locks: Arc<LockCoordinator>,
        runs: Arc<dyn RunStore>,
        messages: Arc<dyn MessageStore>,
        responders: Arc<dyn ResponderDirectory>,
        source: Arc<dyn CompletionSource>,
        config: CoordinationConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            locks,
            runs,
            messages,
            responders,
            source,
            chainer: ModeratorChainer::new(),
            config,
        })
    }

    /// Starts a run: acquires the thread lock, retires stale runs,
    /// creates the run row, and spawns the drive loop.
    ///
    /// Returns as soon as the run is processing. Fails with
    /// `LockConflict` (carrying `retry_after_secs`) when another holder
    /// is active.
    pub async fn start(self: &Arc<Self>, request: RunRequest) -> Result<RunTicket> {
        self.start_run(request, true).await
    }

    // Desugared to a boxed future: `maybe_chain` recurses back into
    // `start_run`, so the future must be boxed and explicitly `Send`.
    fn start_run<'a>(
        self: &'a Arc<Self>,
        request: RunRequest,
        allow_chain: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<RunTicket>> + Send + 'a>> {
        Box::pin(async move {
        let responder = self
            .responders
            .find_by_id(&request.responder_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("Responder", &request.responder_id))?;
        let user_message = self
            .messages
            .find_by_id(&request.user_message_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("Message", &request.user_message_id))?;

        // Server-side locking is authoritative: the sender's producer
        // lock is rewritten when present, a fresh responder lock is
        // created when not.
        self.locks
            .transition_to_responder(
                &request.thread_id,
                &user_message.sender_id,
                &request.responder_id,
            )
            .await?;

        // The lock is ours from here on; release it on any setup failure.
        let run = match self.initialize_run(&request).await {
            Ok(run) => run,
            Err(err) => {
                if let Err(release_err) = self
                    .locks
                    .release(&request.thread_id, &request.responder_id)
                    .await
                {
                    tracing::warn!(
                        "lock release after setup failure failed for thread {}: {}",
                        request.thread_id,
                        release_err
                    );
                }
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let run_id = run.id.clone();
        let this = Arc::clone(self);
        let drive_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            this.drive(run, responder, user_message, allow_chain, drive_cancel)
                .await;
        });

        Ok(RunTicket {
            run_id,
            cancel,
            handle,
        })
        })
    }

    /// Retires stale active runs for the thread, then creates the new
    /// `Initializing` run row. The thread lock already serializes runs
    /// per thread, so any other active row belongs to a crashed or
    /// abandoned run.
    async fn initialize_run(&self, request: &RunRequest) -> Result<StreamingRun> {
        for mut stale in self.runs.list_active(&request.thread_id).await? {
            tracing::warn!(
                "retiring stale run {} for thread {}",
                stale.id,
                request.thread_id
            );
            stale.state = RunState::Failed;
            stale.error = Some("superseded by a newer run".to_string());
            stale.updated_at = Utc::now();
            self.runs.save(&stale).await?;
        }

        let run = StreamingRun::new(
            &request.room_id,
            &request.thread_id,
            &request.responder_id,
            &request.user_message_id,
        );
        self.runs.save(&run).await?;
        Ok(run)
    }

    async fn drive(
        self: Arc<Self>,
        run: StreamingRun,
        responder: Responder,
        user_message: Message,
        allow_chain: bool,
        cancel: CancellationToken,
    ) {
        let room_id = run.room_id.clone();
        let thread_id = run.thread_id.clone();
        let responder_id = run.responder_id.clone();
        let source_message_id = run.source_message_id.clone();

        let mut accumulator = StreamAccumulator::new(
            self.runs.clone(),
            self.messages.clone(),
            run,
            self.config.flush_threshold_chars,
        );

        let outcome = self
            .generate(&mut accumulator, &responder, &user_message, &cancel)
            .await;

        if matches!(outcome, RunOutcome::LockLost) {
            return;
        }
        if let Err(err) = self.locks.release(&thread_id, &responder_id).await {
            tracing::warn!("lock release failed for thread {}: {}", thread_id, err);
        }

        if allow_chain && responder.is_moderator() {
            if let RunOutcome::Completed(message) = outcome {
                // Bounded to one hop: the chained run never chains again.
                self.maybe_chain(&room_id, &thread_id, &source_message_id, &message.content)
                    .await;
            }
        }
    }

    /// The streaming core: context assembly, drain, finalize. Returns
    /// the outcome without touching the lock (except refresh).
    async fn generate(
        &self,
        accumulator: &mut StreamAccumulator,
        responder: &Responder,
        user_message: &Message,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let run_id = accumulator.run().id.clone();
        let thread_id = accumulator.run().thread_id.clone();
        let responder_id = accumulator.run().responder_id.clone();

        let context = match self.assemble_context(responder, user_message).await {
            Ok(context) => context,
            Err(err) => return self.fail_run(accumulator, &err.to_string()).await,
        };

        let mut stream = match self.source.generate(&context).await {
            Ok(stream) => stream,
            Err(err) => return self.fail_run(accumulator, &err.to_string()).await,
        };

        if let Err(err) = accumulator.mark_streaming().await {
            return self.fail_run(accumulator, &err.to_string()).await;
        }
        tracing::info!(
            "run {} streaming for thread {} by {}",
            run_id,
            thread_id,
            responder_id
        );

        let mut refresh = tokio::time::interval(self.config.refresh_interval());
        refresh.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.fail_run(accumulator, "run cancelled").await;
                }
                _ = refresh.tick() => {
                    match self
                        .locks
                        .refresh(&thread_id, &responder_id, self.config.responder_ttl())
                        .await
                    {
                        Ok(RefreshOutcome::Extended) => {}
                        Ok(RefreshOutcome::Lost) => {
                            if let Err(err) = accumulator.fail("thread lock lost during streaming").await {
                                tracing::warn!("failed to mark run {} as failed: {}", run_id, err);
                            }
                            return RunOutcome::LockLost;
                        }
                        Err(err) => return self.fail_run(accumulator, &err.to_string()).await,
                    }
                }
                increment = stream.next() => match increment {
                    Some(Ok(delta)) => {
                        if let Err(err) = accumulator.append(&delta).await {
                            return self.fail_run(accumulator, &err.to_string()).await;
                        }
                    }
                    Some(Err(err)) => return self.fail_run(accumulator, &err.to_string()).await,
                    None => break,
                }
            }
        }

        match accumulator.finalize().await {
            Ok(message) => RunOutcome::Completed(message),
            Err(err) => self.fail_run(accumulator, &err.to_string()).await,
        }
    }

    async fn assemble_context(
        &self,
        responder: &Responder,
        user_message: &Message,
    ) -> Result<GenerationContext> {
        let mut history = self
            .messages
            .list_recent(&user_message.thread_id, self.config.history_window)
            .await?;
        history.reverse(); // newest-first storage order -> oldest-first prompt order

        let roster = if responder.is_moderator() {
            self.responders
                .list_active_in_room(&user_message.room_id)
                .await?
        } else {
            Vec::new()
        };

        context::build_context(
            responder,
            &user_message.content,
            &history,
            &user_message.room_id,
            &roster,
        )
    }

    async fn fail_run(&self, accumulator: &mut StreamAccumulator, reason: &str) -> RunOutcome {
        if let Err(err) = accumulator.fail(reason).await {
            tracing::warn!(
                "failed to mark run {} as failed: {}",
                accumulator.run().id,
                err
            );
        }
        RunOutcome::Failed
    }

    /// Inspects a completed moderator run's output and starts at most
    /// one chained run for the selected responder, reusing the source
    /// message for context continuity. A resolution miss ends the chain
    /// silently.
    async fn maybe_chain(
        self: &Arc<Self>,
        room_id: &str,
        thread_id: &str,
        source_message_id: &str,
        moderator_output: &str,
    ) -> Option<String> {
        let roster = match self.responders.list_active_in_room(room_id).await {
            Ok(roster) => roster,
            Err(err) => {
                tracing::warn!("roster lookup for room {} failed: {}", room_id, err);
                return None;
            }
        };

        let Some(target) = self.chainer.resolve_selection(moderator_output, &roster) else {
            tracing::debug!(
                "moderator output selected no responder for thread {}",
                thread_id
            );
            return None;
        };

        tracing::info!(
            "moderator selected responder {} for thread {}",
            target.name,
            thread_id
        );
        let request = RunRequest {
            room_id: room_id.to_string(),
            thread_id: thread_id.to_string(),
            responder_id: target.id.clone(),
            user_message_id: source_message_id.to_string(),
        };
        // Boxed: the chained start recurses through the drive task.
        match self.start_run(request, false).await {
            Ok(ticket) => Some(ticket.run_id),
            Err(err) => {
                tracing::warn!("chained run for {} not started: {}", target.name, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::completion::IncrementStream;
    use parley_core::lock::LockKind;
    use parley_core::message::SenderKind;
    use parley_core::responder::ResponderKind;
    use parley_infrastructure::{
        MemoryLockStore, MemoryMessageStore, MemoryResponderDirectory, MemoryRunStore,
    };

    /// Replays a fixed script of increments for every generation.
    struct ScriptedSource(Vec<Result<String>>);

    #[async_trait]
    impl CompletionSource for ScriptedSource {
        async fn generate(&self, _context: &GenerationContext) -> Result<IncrementStream> {
            Ok(Box::pin(futures::stream::iter(self.0.clone())))
        }
    }

    /// Fails before producing any increment.
    struct FailingSource;

    #[async_trait]
    impl CompletionSource for FailingSource {
        async fn generate(&self, _context: &GenerationContext) -> Result<IncrementStream> {
            Err(ParleyError::provider("connection refused"))
        }
    }

    /// Emits one increment, then hangs until cancelled.
    struct HangingSource;

    #[async_trait]
    impl CompletionSource for HangingSource {
        async fn generate(&self, _context: &GenerationContext) -> Result<IncrementStream> {
            let head = futures::stream::iter(vec![Ok("partial ".to_string())]);
            Ok(Box::pin(head.chain(futures::stream::pending())))
        }
    }

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        locks: Arc<LockCoordinator>,
        runs: Arc<MemoryRunStore>,
        messages: Arc<MemoryMessageStore>,
        user_message_id: String,
    }

    fn responder(id: &str, name: &str, kind: ResponderKind) -> Responder {
        Responder {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            personality: String::new(),
            instructions: "Answer questions.".to_string(),
            model: "gemini-2.5-flash".to_string(),
            kind,
        }
    }

    async fn fixture(source: Arc<dyn CompletionSource>) -> Fixture {
        fixture_with(source, CoordinationConfig::default()).await
    }

    async fn fixture_with(source: Arc<dyn CompletionSource>, config: CoordinationConfig) -> Fixture {
        let locks = Arc::new(LockCoordinator::new(
            Arc::new(MemoryLockStore::new()),
            config.clone(),
        ));
        let runs = Arc::new(MemoryRunStore::new());
        let messages = Arc::new(MemoryMessageStore::new());
        let directory = Arc::new(MemoryResponderDirectory::new());

        directory.register(responder("ds", "Data Scientist", ResponderKind::Standard));
        directory.register(responder("py", "Python Expert", ResponderKind::Standard));
        directory.register(responder("mod", "Gatekeeper", ResponderKind::Moderator));
        for id in ["ds", "py", "mod"] {
            directory.register_in_room("R1", id);
        }

        let user_message = Message::new("R1", "T1", "help me", SenderKind::Human, "u1", None);
        let user_message_id = user_message.id.clone();
        messages.insert(&user_message).await.unwrap();

        let orchestrator = Orchestrator::new(
            locks.clone(),
            runs.clone(),
            messages.clone(),
            directory,
            source,
            config,
        );

        Fixture {
            orchestrator,
            locks,
            runs,
            messages,
            user_message_id,
        }
    }

    fn request(fixture: &Fixture, responder_id: &str) -> RunRequest {
        RunRequest {
            room_id: "R1".to_string(),
            thread_id: "T1".to_string(),
            responder_id: responder_id.to_string(),
            user_message_id: fixture.user_message_id.clone(),
        }
    }

    #[tokio::test]
    async fn happy_path_completes_and_releases() {
        let fx = fixture(Arc::new(ScriptedSource(vec![
            Ok("Hel".to_string()),
            Ok("lo wo".to_string()),
            Ok("rld".to_string()),
        ])))
        .await;

        let ticket = fx.orchestrator.start(request(&fx, "ds")).await.unwrap();
        ticket.handle.await.unwrap();

        let run = fx.runs.find_by_id(&ticket.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Complete);
        assert_eq!(run.content, "Hello world");
        let final_id = run.final_record_id.expect("complete run has a final record");

        let message = fx.messages.find_by_id(&final_id).await.unwrap().unwrap();
        assert_eq!(message.content, "Hello world");
        assert_eq!(message.sender_id, "ds");
        assert_eq!(message.in_reply_to.as_deref(), Some(fx.user_message_id.as_str()));

        // Lock released: a producer can acquire immediately.
        fx.locks.acquire_producer("T1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn mid_stream_provider_failure_fails_run_and_releases() {
        let fx = fixture(Arc::new(ScriptedSource(vec![
            Ok("par".to_string()),
            Err(ParleyError::provider("stream reset")),
        ])))
        .await;

        let ticket = fx.orchestrator.start(request(&fx, "ds")).await.unwrap();
        ticket.handle.await.unwrap();

        let run = fx.runs.find_by_id(&ticket.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert!(run.error.as_deref().unwrap().contains("stream reset"));
        assert!(run.final_record_id.is_none());

        // No partial message was created; only the user's message exists.
        assert_eq!(fx.messages.list_recent("T1", 10).await.unwrap().len(), 1);
        fx.locks.acquire_producer("T1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn pre_stream_provider_failure_fails_run_and_releases() {
        let fx = fixture(Arc::new(FailingSource)).await;

        let ticket = fx.orchestrator.start(request(&fx, "ds")).await.unwrap();
        ticket.handle.await.unwrap();

        let run = fx.runs.find_by_id(&ticket.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        fx.locks.acquire_producer("T1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn start_reports_conflict_while_another_responder_holds() {
        let fx = fixture(Arc::new(FailingSource)).await;
        fx.locks
            .transition_to_responder("T1", "u1", "py")
            .await
            .unwrap();

        let err = fx.orchestrator.start(request(&fx, "ds")).await.unwrap_err();
        match err {
            ParleyError::LockConflict { holder, kind, retry_after_secs, .. } => {
                assert_eq!(holder, "py");
                assert_eq!(kind, LockKind::Responder);
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_responder_is_rejected_before_locking() {
        let fx = fixture(Arc::new(FailingSource)).await;

        let err = fx
            .orchestrator
            .start(request(&fx, "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { .. }));

        // No lock was taken.
        fx.locks.acquire_producer("T1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn stale_active_runs_are_retired_before_starting() {
        let fx = fixture(Arc::new(ScriptedSource(vec![Ok("ok".to_string())]))).await;

        let mut stale = StreamingRun::new("R1", "T1", "py", &fx.user_message_id);
        stale.state = RunState::Streaming;
        stale.content = "orphaned partial".to_string();
        fx.runs.save(&stale).await.unwrap();

        let ticket = fx.orchestrator.start(request(&fx, "ds")).await.unwrap();
        ticket.handle.await.unwrap();

        let retired = fx.runs.find_by_id(&stale.id).await.unwrap().unwrap();
        assert_eq!(retired.state, RunState::Failed);
        assert_eq!(retired.error.as_deref(), Some("superseded by a newer run"));

        let fresh = fx.runs.find_by_id(&ticket.run_id).await.unwrap().unwrap();
        assert_eq!(fresh.state, RunState::Complete);
    }

    #[tokio::test]
    async fn cancellation_fails_the_run_and_releases_the_lock() {
        let fx = fixture(Arc::new(HangingSource)).await;

        let ticket = fx.orchestrator.start(request(&fx, "ds")).await.unwrap();
        // Let the drive loop reach the drain before cancelling.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        ticket.cancel.cancel();
        ticket.handle.await.unwrap();

        let run = fx.runs.find_by_id(&ticket.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error.as_deref(), Some("run cancelled"));
        assert!(run.final_record_id.is_none());

        fx.locks.acquire_producer("T1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn lost_refresh_fails_the_run_and_spares_the_new_holder() {
        // A zero responder TTL expires the lock the moment it is granted,
        // so the first periodic refresh reports it lost.
        let fx = fixture_with(
            Arc::new(HangingSource),
            CoordinationConfig {
                responder_ttl_secs: 0,
                ..CoordinationConfig::default()
            },
        )
        .await;

        let ticket = fx.orchestrator.start(request(&fx, "ds")).await.unwrap();
        // The expired slot is free, so another participant takes the
        // thread while the run is still draining.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fx.locks.acquire_producer("T1", "u2").await.unwrap();

        ticket.handle.await.unwrap();

        let run = fx.runs.find_by_id(&ticket.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(
            run.error.as_deref(),
            Some("thread lock lost during streaming")
        );
        assert!(run.final_record_id.is_none());

        // The run skipped release, leaving the new holder undisturbed.
        let err = fx.locks.acquire_producer("T1", "u3").await.unwrap_err();
        match err {
            ParleyError::LockConflict { holder, .. } => assert_eq!(holder, "u2"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn moderator_resolution_miss_ends_the_chain_silently() {
        let fx = fixture(Arc::new(ScriptedSource(vec![Ok(
            "I suggest reading the documentation first.".to_string(),
        )])))
        .await;

        let ticket = fx.orchestrator.start(request(&fx, "mod")).await.unwrap();
        ticket.handle.await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let run = fx.runs.find_by_id(&ticket.run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Complete);

        // Only the user message and the moderator's own output exist.
        assert_eq!(fx.messages.list_recent("T1", 10).await.unwrap().len(), 2);
        assert!(fx.runs.list_active("T1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn moderator_selecting_a_moderator_does_not_chain() {
        let fx = fixture(Arc::new(ScriptedSource(vec![Ok(
            r#"{"message": "Routing.", "responder_id": "mod"}"#.to_string(),
        )])))
        .await;

        let ticket = fx.orchestrator.start(request(&fx, "mod")).await.unwrap();
        ticket.handle.await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(fx.messages.list_recent("T1", 10).await.unwrap().len(), 2);
        assert!(fx.runs.list_active("T1").await.unwrap().is_empty());
    }
}
