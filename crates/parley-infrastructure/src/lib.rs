//! Infrastructure layer for Parley.
//!
//! In-memory implementations of the core store traits. These back tests
//! and single-process deployments; the traits themselves are the seam a
//! database-backed deployment implements instead. Each write runs under
//! one mutex acquisition, which gives the lock table the atomic
//! read-modify-write semantics the coordination layer relies on.

mod memory;

pub use memory::lock_store::MemoryLockStore;
pub use memory::message_store::MemoryMessageStore;
pub use memory::responder_directory::MemoryResponderDirectory;
pub use memory::run_store::MemoryRunStore;
