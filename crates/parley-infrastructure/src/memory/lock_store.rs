//! In-memory lock table.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::Result;
use parley_core::lock::ThreadLock;
use parley_core::store::{LockAttempt, LockGuard, LockStore};

use super::lock_rows;

/// Mutex-backed lock table keyed by thread id.
///
/// The whole guarded upsert runs under a single mutex acquisition, so
/// concurrent writers for the same thread serialize exactly as a
/// conditional UPDATE would in a relational store.
#[derive(Default)]
pub struct MemoryLockStore {
    rows: Mutex<HashMap<String, ThreadLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, thread_id: &str) -> Result<Option<ThreadLock>> {
        Ok(lock_rows(&self.rows).get(thread_id).cloned())
    }

    async fn upsert_guarded(
        &self,
        lock: ThreadLock,
        guard: LockGuard,
        now: DateTime<Utc>,
    ) -> Result<LockAttempt> {
        let mut rows = lock_rows(&self.rows);

        if let Some(existing) = rows.get(&lock.thread_id) {
            if existing.is_live(now) {
                let holder_matches = existing.is_held_by(&guard.expected_holder);
                let kind_matches = guard
                    .expected_kind
                    .map(|kind| existing.kind == kind)
                    .unwrap_or(true);
                if !(holder_matches && kind_matches) {
                    return Ok(LockAttempt::Conflict(existing.clone()));
                }
                rows.insert(lock.thread_id.clone(), lock.clone());
                return Ok(LockAttempt::Granted(lock));
            }
        }

        // Vacant or expired slot.
        if !guard.allow_vacant {
            return Ok(LockAttempt::Vacant);
        }
        rows.insert(lock.thread_id.clone(), lock.clone());
        Ok(LockAttempt::Granted(lock))
    }

    async fn extend_if_held(
        &self,
        thread_id: &str,
        holder_id: &str,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ThreadLock>> {
        let mut rows = lock_rows(&self.rows);

        match rows.get_mut(thread_id) {
            Some(existing) if existing.is_live(now) && existing.is_held_by(holder_id) => {
                existing.expires_at = new_expires_at;
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_if_held(&self, thread_id: &str, holder_id: &str) -> Result<bool> {
        let mut rows = lock_rows(&self.rows);

        match rows.get(thread_id) {
            Some(existing) if existing.is_held_by(holder_id) => {
                rows.remove(thread_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_core::lock::LockKind;

    fn producer_lock(thread: &str, holder: &str, now: DateTime<Utc>, ttl_secs: i64) -> ThreadLock {
        ThreadLock::new(
            thread,
            holder,
            LockKind::Producer,
            now,
            Duration::seconds(ttl_secs),
        )
    }

    #[tokio::test]
    async fn vacant_slot_grants() {
        let store = MemoryLockStore::new();
        let now = Utc::now();

        let attempt = store
            .upsert_guarded(
                producer_lock("t1", "u1", now, 30),
                LockGuard::reentrant("u1", LockKind::Producer),
                now,
            )
            .await
            .unwrap();

        assert!(matches!(attempt, LockAttempt::Granted(_)));
        assert!(store.get("t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn live_foreign_row_conflicts() {
        let store = MemoryLockStore::new();
        let now = Utc::now();
        store
            .upsert_guarded(
                producer_lock("t1", "u1", now, 30),
                LockGuard::reentrant("u1", LockKind::Producer),
                now,
            )
            .await
            .unwrap();

        let attempt = store
            .upsert_guarded(
                producer_lock("t1", "u2", now, 30),
                LockGuard::reentrant("u2", LockKind::Producer),
                now,
            )
            .await
            .unwrap();

        match attempt {
            LockAttempt::Conflict(existing) => assert_eq!(existing.holder_id, "u1"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_row_is_a_free_slot() {
        let store = MemoryLockStore::new();
        let now = Utc::now();
        store
            .upsert_guarded(
                producer_lock("t1", "u1", now, 0),
                LockGuard::reentrant("u1", LockKind::Producer),
                now,
            )
            .await
            .unwrap();

        // u1's lock expired immediately; u2 takes the slot without release.
        let attempt = store
            .upsert_guarded(
                producer_lock("t1", "u2", now, 30),
                LockGuard::reentrant("u2", LockKind::Producer),
                now,
            )
            .await
            .unwrap();

        assert!(matches!(attempt, LockAttempt::Granted(_)));
    }

    #[tokio::test]
    async fn guard_requiring_existing_row_reports_vacant() {
        let store = MemoryLockStore::new();
        let now = Utc::now();

        let guard = LockGuard {
            expected_holder: "u1".to_string(),
            expected_kind: None,
            allow_vacant: false,
        };
        let attempt = store
            .upsert_guarded(producer_lock("t1", "u1", now, 30), guard, now)
            .await
            .unwrap();

        assert!(matches!(attempt, LockAttempt::Vacant));
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extend_requires_live_ownership() {
        let store = MemoryLockStore::new();
        let now = Utc::now();
        store
            .upsert_guarded(
                producer_lock("t1", "u1", now, 30),
                LockGuard::reentrant("u1", LockKind::Producer),
                now,
            )
            .await
            .unwrap();

        let later = now + Duration::seconds(90);
        let extended = store
            .extend_if_held("t1", "u1", later, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.expires_at, later);

        // A different holder cannot extend.
        assert!(
            store
                .extend_if_held("t1", "u2", later, now)
                .await
                .unwrap()
                .is_none()
        );
        // An expired row cannot be extended.
        assert!(
            store
                .extend_if_held("t1", "u1", later, later + Duration::seconds(1))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn delete_is_holder_scoped() {
        let store = MemoryLockStore::new();
        let now = Utc::now();
        store
            .upsert_guarded(
                producer_lock("t1", "u1", now, 30),
                LockGuard::reentrant("u1", LockKind::Producer),
                now,
            )
            .await
            .unwrap();

        assert!(!store.delete_if_held("t1", "u2").await.unwrap());
        assert!(store.get("t1").await.unwrap().is_some());
        assert!(store.delete_if_held("t1", "u1").await.unwrap());
        assert!(!store.delete_if_held("t1", "u1").await.unwrap());
    }
}
