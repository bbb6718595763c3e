//! Named advisory locks with a dedicated backend session per held lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::backend::{LockBackend, LockKey, LockSession};
use super::guard::LockGuard;

/// Default upper bound on one backend acquisition round trip.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Process-wide lock manager.
///
/// Lock names hash to a stable numeric key pair, so every process that agrees
/// on the name contends on the same database-side lock. Acquisition is
/// non-blocking and fails closed: a backend error or timeout reports the lock
/// as not acquired, never as held.
pub struct AdvisoryLockService {
    backend: Arc<dyn LockBackend>,
    held: Mutex<HashMap<String, Box<dyn LockSession>>>,
    acquire_timeout: Duration,
}

impl AdvisoryLockService {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self::with_timeout(backend, Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS))
    }

    pub fn with_timeout(backend: Arc<dyn LockBackend>, acquire_timeout: Duration) -> Self {
        Self {
            backend,
            held: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    /// Derive the numeric key pair for a lock name.
    ///
    /// The first four bytes of the SHA-256 digest become one signed 32-bit
    /// key and the next four the other. Stable across processes and releases;
    /// changing this would break mutual exclusion during a rolling deploy.
    pub fn lock_key(name: &str) -> LockKey {
        let digest = Sha256::digest(name.as_bytes());
        LockKey {
            key1: i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]),
            key2: i32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]),
        }
    }

    /// Non-blocking acquire by name.
    ///
    /// Returns `true` when this process now holds the lock, including the
    /// case where it already held it (no second backend session is opened).
    pub async fn try_acquire(&self, name: &str) -> bool {
        let mut held = self.held.lock().await;
        if held.contains_key(name) {
            debug!("[Locks] '{}' already held by this process", name);
            return true;
        }
        match self.acquire_session(name).await {
            Some(session) => {
                held.insert(name.to_string(), session);
                true
            }
            None => false,
        }
    }

    /// Acquire by name, returning a guard that releases on drop.
    ///
    /// Unlike [`try_acquire`](Self::try_acquire) this hands out exclusive
    /// ownership: a name already held by this process reports unavailable
    /// instead of a second guard, so two tasks can never both believe they
    /// own the same critical section.
    pub async fn acquire_scoped(self: &Arc<Self>, name: &str) -> Option<LockGuard> {
        let mut held = self.held.lock().await;
        if held.contains_key(name) {
            debug!("[Locks] Scoped acquire of '{}': already held in-process", name);
            return None;
        }
        let session = self.acquire_session(name).await?;
        held.insert(name.to_string(), session);
        Some(LockGuard::new(Arc::clone(self), name.to_string()))
    }

    async fn acquire_session(&self, name: &str) -> Option<Box<dyn LockSession>> {
        let key = Self::lock_key(name);
        let attempt = tokio::time::timeout(self.acquire_timeout, self.backend.try_acquire(key));
        match attempt.await {
            Ok(Ok(Some(session))) => {
                debug!("[Locks] Acquired '{}' ({}/{})", name, key.key1, key.key2);
                Some(session)
            }
            Ok(Ok(None)) => {
                debug!("[Locks] '{}' is held elsewhere", name);
                None
            }
            Ok(Err(err)) => {
                // Fail closed: an unreachable backend means we cannot prove
                // exclusivity, so the caller must not proceed.
                warn!("[Locks] Acquire of '{}' failed: {}", name, err);
                None
            }
            Err(_) => {
                warn!(
                    "[Locks] Acquire of '{}' timed out after {:?}",
                    name, self.acquire_timeout
                );
                None
            }
        }
    }

    /// Best-effort release by name.
    ///
    /// The local entry is always forgotten, even when the backend unlock
    /// fails; the session is dropped in that case and the lock dies with it.
    pub async fn release(&self, name: &str) {
        let session = self.held.lock().await.remove(name);
        let Some(mut session) = session else {
            debug!("[Locks] Release of '{}' ignored: not held here", name);
            return;
        };
        match session.unlock().await {
            Ok(true) => debug!("[Locks] Released '{}'", name),
            Ok(false) => warn!(
                "[Locks] Release of '{}': backend reports it was not held by this session",
                name
            ),
            Err(err) => warn!("[Locks] Release of '{}' failed: {}", name, err),
        }
    }

    /// Release every lock this process holds. Failures are logged per lock
    /// and never stop the loop; wired into process shutdown.
    pub async fn release_all(&self) {
        let names: Vec<String> = self.held.lock().await.keys().cloned().collect();
        if names.is_empty() {
            return;
        }
        info!("[Locks] Releasing {} held lock(s)", names.len());
        for name in names {
            self.release(&name).await;
        }
    }

    /// Whether this process holds the named lock.
    pub async fn is_held(&self, name: &str) -> bool {
        self.held.lock().await.contains_key(name)
    }

    /// Number of locks this process currently holds.
    pub async fn held_count(&self) -> usize {
        self.held.lock().await.len()
    }
}
