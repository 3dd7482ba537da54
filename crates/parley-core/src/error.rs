//! Error types for the Parley coordination core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::LockKind;

/// A shared error type for the coordination core.
///
/// This provides typed, structured error variants covering the taxonomy
/// the coordination layer exposes: lock conflicts, provider failures,
/// store failures, and missing entities. Nothing here is retried
/// internally; callers decide whether to issue a fresh request.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ParleyError {
    /// Another holder owns the thread lock; retry after the hint elapses.
    #[error("thread '{thread_id}' is locked by '{holder}' ({kind:?}); retry after {retry_after_secs}s")]
    LockConflict {
        thread_id: String,
        holder: String,
        kind: LockKind,
        retry_after_secs: i64,
    },

    /// The completion source failed before or during streaming.
    #[error("completion source failure: {0}")]
    Provider(String),

    /// A durable read or write failed. Fatal to the current run only.
    #[error("store failure: {0}")]
    Store(String),

    /// Entity not found error with type information.
    #[error("entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Internal error (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Creates a Provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Creates a Store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a NotFound error.
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true when this error is a lock conflict the caller should
    /// surface as a "busy, try again" state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// The retry hint carried by a lock conflict, if any.
    pub fn retry_after_secs(&self) -> Option<i64> {
        match self {
            Self::LockConflict {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Result type alias using `ParleyError`.
pub type Result<T> = std::result::Result<T, ParleyError>;
