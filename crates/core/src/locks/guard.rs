//! Scoped lock handle.

use std::sync::Arc;

use log::warn;

use super::service::AdvisoryLockService;

/// Handle for one held named lock.
///
/// Release happens exactly once: either through the explicit async
/// [`release`](LockGuard::release) on deterministic exit paths, or scheduled
/// from `Drop` when the guard leaves scope any other way (early return,
/// panic, task abort).
pub struct LockGuard {
    service: Arc<AdvisoryLockService>,
    name: String,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(service: Arc<AdvisoryLockService>, name: String) -> Self {
        Self {
            service,
            name,
            released: false,
        }
    }

    /// Name of the held lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock now.
    pub async fn release(mut self) {
        self.released = true;
        let name = std::mem::take(&mut self.name);
        self.service.release(&name).await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let service = Arc::clone(&self.service);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    service.release(&name).await;
                });
            }
            // Outside a runtime there is nothing to run the release on; the
            // backend session's own teardown frees the lock.
            Err(_) => warn!(
                "[Locks] Guard for '{}' dropped outside a runtime; relying on session teardown",
                name
            ),
        }
    }
}
