//! Core domain layer for Parley.
//!
//! This crate defines the domain models, store traits, and the
//! completion-source seam that the coordination layer operates on.
//! Everything stateful lives behind a trait so the same coordination
//! logic runs against any backing store.
//!
//! # Module Structure
//!
//! - `error`: Shared error type (`ParleyError`) and `Result` alias
//! - `lock`: Thread lock domain model (`ThreadLock`, `LockKind`)
//! - `run`: Streaming run domain model (`StreamingRun`, `RunState`)
//! - `message`: Permanent message model (`Message`, `SenderKind`)
//! - `responder`: Responder configuration (`Responder`, `ResponderKind`)
//! - `store`: Store traits (`LockStore`, `RunStore`, `MessageStore`,
//!   `ResponderDirectory`) and the change-notification type
//! - `completion`: Completion-source trait and generation context
//! - `config`: Coordination tunables (`CoordinationConfig`)

pub mod completion;
pub mod config;
pub mod error;
pub mod lock;
pub mod message;
pub mod responder;
pub mod run;
pub mod store;

// Re-export common error type
pub use error::{ParleyError, Result};
