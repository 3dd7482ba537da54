//! Coordination layer for Parley.
//!
//! This crate drives one response generation end-to-end: the thread lock
//! coordinator serializes access per thread across service instances,
//! the stream accumulator batches increments into durable writes, the
//! orchestrator runs the state machine from context assembly through
//! finalization, and the moderator chainer hands a moderator's selection
//! off to exactly one follow-up run.

pub mod accumulator;
pub mod context;
pub mod lock;
pub mod moderation;
pub mod orchestrator;

pub use accumulator::StreamAccumulator;
pub use lock::{LockCoordinator, RefreshOutcome};
pub use moderation::{ModeratorChainer, PatternSelection, SelectionResolver, StructuredSelection};
pub use orchestrator::{Orchestrator, RunRequest, RunTicket};
