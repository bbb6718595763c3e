use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use super::*;

fn service_on(backend: &Arc<MemoryLockBackend>) -> Arc<AdvisoryLockService> {
    let backend: Arc<dyn LockBackend> = Arc::clone(backend) as Arc<dyn LockBackend>;
    Arc::new(AdvisoryLockService::new(backend))
}

struct FailingBackend;

#[async_trait]
impl LockBackend for FailingBackend {
    async fn try_acquire(&self, _key: LockKey) -> Result<Option<Box<dyn LockSession>>, LockError> {
        Err(LockError::backend("connection refused"))
    }
}

struct HangingBackend;

#[async_trait]
impl LockBackend for HangingBackend {
    async fn try_acquire(&self, _key: LockKey) -> Result<Option<Box<dyn LockSession>>, LockError> {
        std::future::pending().await
    }
}

#[test]
fn lock_key_is_stable_and_name_dependent() {
    let a = AdvisoryLockService::lock_key("sync:device-telemetry");
    let b = AdvisoryLockService::lock_key("sync:device-telemetry");
    let c = AdvisoryLockService::lock_key("sync:task-tracker");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[tokio::test]
async fn concurrent_acquires_have_exactly_one_winner() {
    let backend = Arc::new(MemoryLockBackend::new());
    let services: Vec<_> = (0..8).map(|_| service_on(&backend)).collect();

    let attempts = services
        .iter()
        .map(|service| {
            let service = Arc::clone(service);
            async move { service.try_acquire("sync:device-telemetry").await }
        })
        .collect::<Vec<_>>();
    let outcomes = join_all(attempts).await;

    assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);
    assert_eq!(backend.held_count(), 1);
}

#[tokio::test]
async fn release_hands_the_lock_to_the_next_acquirer() {
    let backend = Arc::new(MemoryLockBackend::new());
    let first = service_on(&backend);
    let second = service_on(&backend);

    assert!(first.try_acquire("sync:task-tracker").await);
    assert!(!second.try_acquire("sync:task-tracker").await);

    first.release("sync:task-tracker").await;
    assert!(second.try_acquire("sync:task-tracker").await);
    second.release("sync:task-tracker").await;
}

#[tokio::test]
async fn reacquire_by_holder_is_idempotent() {
    let backend = Arc::new(MemoryLockBackend::new());
    let service = service_on(&backend);

    assert!(service.try_acquire("sync:device-telemetry").await);
    assert!(service.try_acquire("sync:device-telemetry").await);

    // No second backend session was opened for the repeat acquire.
    assert_eq!(backend.held_count(), 1);
    assert_eq!(service.held_count().await, 1);

    service.release("sync:device-telemetry").await;
    assert_eq!(backend.held_count(), 0);
}

#[tokio::test]
async fn dead_holder_session_frees_the_lock() {
    let backend = Arc::new(MemoryLockBackend::new());
    let crashed = service_on(&backend);
    let survivor = service_on(&backend);

    assert!(crashed.try_acquire("sync:device-telemetry").await);
    assert!(!survivor.try_acquire("sync:device-telemetry").await);

    // Simulate the holder's connection dying without an unlock call.
    assert!(backend.kill_holder(AdvisoryLockService::lock_key("sync:device-telemetry")));
    assert!(survivor.try_acquire("sync:device-telemetry").await);

    // The crashed service still has a stale local entry; releasing it must
    // not disturb the new holder.
    crashed.release("sync:device-telemetry").await;
    assert!(backend.is_held(AdvisoryLockService::lock_key("sync:device-telemetry")));

    survivor.release("sync:device-telemetry").await;
}

#[tokio::test]
async fn backend_failure_reports_not_acquired() {
    let service = Arc::new(AdvisoryLockService::new(Arc::new(FailingBackend)));
    assert!(!service.try_acquire("sync:device-telemetry").await);
    assert_eq!(service.held_count().await, 0);
}

#[tokio::test]
async fn slow_backend_times_out_as_not_acquired() {
    let service = Arc::new(AdvisoryLockService::with_timeout(
        Arc::new(HangingBackend),
        Duration::from_millis(50),
    ));
    assert!(!service.try_acquire("sync:device-telemetry").await);
    assert_eq!(service.held_count().await, 0);
}

#[tokio::test]
async fn release_all_empties_the_held_set() {
    let backend = Arc::new(MemoryLockBackend::new());
    let service = service_on(&backend);

    assert!(service.try_acquire("sync:device-telemetry").await);
    assert!(service.try_acquire("sync:task-tracker").await);
    assert!(service.try_acquire("token-refresh:user-1").await);
    assert_eq!(backend.held_count(), 3);

    service.release_all().await;
    assert_eq!(service.held_count().await, 0);
    assert_eq!(backend.held_count(), 0);
}

#[tokio::test]
async fn releasing_an_unheld_name_is_a_no_op() {
    let backend = Arc::new(MemoryLockBackend::new());
    let service = service_on(&backend);
    service.release("sync:device-telemetry").await;
    assert_eq!(backend.held_count(), 0);
}

#[tokio::test]
async fn scoped_guard_releases_explicitly() {
    let backend = Arc::new(MemoryLockBackend::new());
    let first = service_on(&backend);
    let second = service_on(&backend);

    let guard = first.acquire_scoped("sync:device-telemetry").await;
    let guard = guard.expect("first scoped acquire");
    assert!(!second.try_acquire("sync:device-telemetry").await);

    guard.release().await;
    assert!(second.try_acquire("sync:device-telemetry").await);
    second.release("sync:device-telemetry").await;
}

#[tokio::test]
async fn scoped_guard_releases_on_drop() {
    let backend = Arc::new(MemoryLockBackend::new());
    let first = service_on(&backend);
    let second = service_on(&backend);

    {
        let _guard = first
            .acquire_scoped("sync:device-telemetry")
            .await
            .expect("scoped acquire");
        assert!(!second.try_acquire("sync:device-telemetry").await);
    }

    // The drop path schedules the release on the runtime.
    for _ in 0..20 {
        if second.try_acquire("sync:device-telemetry").await {
            second.release("sync:device-telemetry").await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("lock was not released after guard drop");
}

#[tokio::test]
async fn scoped_guard_is_exclusive_within_the_process() {
    let backend = Arc::new(MemoryLockBackend::new());
    let service = service_on(&backend);

    let guard = service
        .acquire_scoped("token-refresh:user-1")
        .await
        .expect("first scoped acquire");
    assert!(service.acquire_scoped("token-refresh:user-1").await.is_none());

    guard.release().await;
    let reacquired = service.acquire_scoped("token-refresh:user-1").await;
    assert!(reacquired.is_some());
}
