//! Lock backend abstraction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

/// Numeric advisory-lock key pair derived from a lock name.
///
/// Two independent 32-bit keys keep the collision surface small while staying
/// within what a two-argument database advisory lock accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub key1: i32,
    pub key2: i32,
}

/// Errors reported by a lock backend.
#[derive(Debug, Error)]
pub enum LockError {
    /// The backend could not answer (connection failure, query error)
    #[error("lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// Create a backend error from any displayable source.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// One acquired lock, bound to a dedicated backend session.
///
/// Dropping a session without calling [`unlock`](LockSession::unlock) must
/// not leave the lock visible to other holders: backends tie the lock to the
/// session's lifetime, so the lock dies when the session does. That same
/// property is what releases locks held by a crashed process.
///
/// `Send` only: sessions wrap a live database connection and are always
/// owned by exactly one holder, behind the service's own mutex.
#[async_trait]
pub trait LockSession: Send {
    /// Release the lock on this session. Returns `true` when the backend
    /// confirmed the lock was held here and is now free.
    async fn unlock(&mut self) -> Result<bool, LockError>;
}

/// Non-blocking acquisition of session-scoped locks.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Try to take the lock for `key` on a fresh session. `Ok(None)` means
    /// another session holds it.
    async fn try_acquire(&self, key: LockKey) -> Result<Option<Box<dyn LockSession>>, LockError>;
}

// ─────────────────────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryLockState {
    held: HashMap<LockKey, u64>,
}

/// In-process lock backend for tests and single-node deployments.
///
/// Sessions are tracked by id so tests can kill a holder and observe the
/// crash-release behavior the database backend provides for free.
#[derive(Default)]
pub struct MemoryLockBackend {
    state: Arc<Mutex<MemoryLockState>>,
    next_session: AtomicU64,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop whichever session currently holds `key`, simulating the death of
    /// its connection. Returns whether a holder existed.
    pub fn kill_holder(&self, key: LockKey) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.held.remove(&key).is_some()
    }

    /// Whether any session holds `key` right now.
    pub fn is_held(&self, key: LockKey) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.held.contains_key(&key)
    }

    /// Number of keys currently locked.
    pub fn held_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.held.len()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn try_acquire(&self, key: LockKey) -> Result<Option<Box<dyn LockSession>>, LockError> {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.held.contains_key(&key) {
            return Ok(None);
        }
        state.held.insert(key, session_id);
        Ok(Some(Box::new(MemoryLockSession {
            session_id,
            key,
            state: Arc::clone(&self.state),
        })))
    }
}

struct MemoryLockSession {
    session_id: u64,
    key: LockKey,
    state: Arc<Mutex<MemoryLockState>>,
}

#[async_trait]
impl LockSession for MemoryLockSession {
    async fn unlock(&mut self) -> Result<bool, LockError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.held.get(&self.key) {
            Some(holder) if *holder == self.session_id => {
                state.held.remove(&self.key);
                Ok(true)
            }
            // Either never held or already killed out from under us.
            _ => Ok(false),
        }
    }
}

impl Drop for MemoryLockSession {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.held.get(&self.key) == Some(&self.session_id) {
            state.held.remove(&self.key);
        }
    }
}
