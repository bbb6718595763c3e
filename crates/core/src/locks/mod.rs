//! Cross-instance mutual exclusion built on database advisory locks.
//!
//! Every named lock pins one dedicated backend session for as long as it is
//! held. The database releases a session's locks when the session dies, so a
//! crashed holder frees its locks without any cleanup protocol.

mod backend;
mod guard;
mod service;

pub use backend::{LockBackend, LockError, LockKey, LockSession, MemoryLockBackend};
pub use guard::LockGuard;
pub use service::{AdvisoryLockService, DEFAULT_ACQUIRE_TIMEOUT_MS};

#[cfg(test)]
mod tests;
