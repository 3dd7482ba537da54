//! Thread lock coordinator.
//!
//! Policy layer over the lock store: acquisition, producer-to-responder
//! transition, refresh, and release. Every operation is one atomic
//! read-modify-write at the store, with liveness evaluated against the
//! current time inside that operation — two concurrent acquisitions for
//! the same thread yield exactly one grant.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parley_core::config::CoordinationConfig;
use parley_core::lock::{LockKind, ThreadLock};
use parley_core::store::{LockAttempt, LockGuard, LockStore};
use parley_core::{ParleyError, Result};

/// Result of a lock refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The deadline was pushed back; the caller still holds the lock.
    Extended,
    /// The lock expired or was taken by someone else. The caller must
    /// abort its run and must not release — the lock is no longer its
    /// to release.
    Lost,
}

/// Serializes access to conversation threads.
pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    config: CoordinationConfig,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>, config: CoordinationConfig) -> Self {
        Self { store, config }
    }

    /// Acquires a `Producer` lock for a human about to send a message.
    ///
    /// Idempotently re-grants when the same participant already holds a
    /// live producer lock. Conflicts when a responder is generating or a
    /// different participant is composing.
    pub async fn acquire_producer(
        &self,
        thread_id: &str,
        participant_id: &str,
    ) -> Result<ThreadLock> {
        let now = Utc::now();
        let lock = ThreadLock::new(
            thread_id,
            participant_id,
            LockKind::Producer,
            now,
            self.config.producer_ttl(),
        );

        match self
            .store
            .upsert_guarded(lock, LockGuard::reentrant(participant_id, LockKind::Producer), now)
            .await?
        {
            LockAttempt::Granted(granted) => {
                tracing::info!(
                    "acquired producer lock for thread {} by {}",
                    thread_id,
                    participant_id
                );
                Ok(granted)
            }
            LockAttempt::Conflict(existing) => Err(conflict(&existing, now)),
            LockAttempt::Vacant => Err(ParleyError::internal(
                "guarded producer acquisition reported vacant with allow_vacant set",
            )),
        }
    }

    /// Hands a thread over to an automated responder about to generate.
    ///
    /// Rewrites the requesting participant's own `Producer` lock in
    /// place, or creates a fresh `Responder` lock when no live lock
    /// exists — the producer-side acquisition is best-effort, so its
    /// absence must not block processing.
    pub async fn transition_to_responder(
        &self,
        thread_id: &str,
        requesting_participant_id: &str,
        responder_id: &str,
    ) -> Result<ThreadLock> {
        let now = Utc::now();
        let lock = ThreadLock::new(
            thread_id,
            responder_id,
            LockKind::Responder,
            now,
            self.config.responder_ttl(),
        );

        match self
            .store
            .upsert_guarded(
                lock,
                LockGuard::reentrant(requesting_participant_id, LockKind::Producer),
                now,
            )
            .await?
        {
            LockAttempt::Granted(granted) => {
                tracing::info!(
                    "thread {} lock transitioned to responder {}",
                    thread_id,
                    responder_id
                );
                Ok(granted)
            }
            LockAttempt::Conflict(existing) => Err(conflict(&existing, now)),
            LockAttempt::Vacant => Err(ParleyError::internal(
                "guarded responder transition reported vacant with allow_vacant set",
            )),
        }
    }

    /// Pushes back the deadline of a lock the caller still holds.
    ///
    /// Long-running generation calls this periodically to avoid false
    /// expiry. `Lost` means the lock actually expired (and possibly
    /// changed hands) — the run must abort and skip `release`.
    pub async fn refresh(
        &self,
        thread_id: &str,
        holder_id: &str,
        extension: Duration,
    ) -> Result<RefreshOutcome> {
        let now = Utc::now();
        let extended = self
            .store
            .extend_if_held(thread_id, holder_id, now + extension, now)
            .await?;

        match extended {
            Some(_) => Ok(RefreshOutcome::Extended),
            None => {
                tracing::warn!(
                    "refresh for thread {} failed: lock no longer held by {}",
                    thread_id,
                    holder_id
                );
                Ok(RefreshOutcome::Lost)
            }
        }
    }

    /// Releases the lock held by `holder_id`.
    ///
    /// Idempotent: releasing an absent, expired, or foreign lock is a
    /// no-op success. Invoked on every exit path of an orchestration
    /// run.
    pub async fn release(&self, thread_id: &str, holder_id: &str) -> Result<()> {
        let removed = self.store.delete_if_held(thread_id, holder_id).await?;
        if removed {
            tracing::info!("released lock for thread {} by {}", thread_id, holder_id);
        } else {
            tracing::debug!(
                "release for thread {} by {} was a no-op",
                thread_id,
                holder_id
            );
        }
        Ok(())
    }
}

/// Maps a blocking live lock to the conflict error handed to callers.
fn conflict(existing: &ThreadLock, now: chrono::DateTime<Utc>) -> ParleyError {
    ParleyError::LockConflict {
        thread_id: existing.thread_id.clone(),
        holder: existing.holder_id.clone(),
        kind: existing.kind,
        retry_after_secs: existing.retry_after_secs(now),
    }
}
