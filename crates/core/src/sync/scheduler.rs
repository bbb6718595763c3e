//! Background cadence for the reconcile engines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::model::{CycleStatus, SyncCycleResult, SyncEngineStats};

/// Maximum jitter (seconds) added to periodic cycle intervals so a fleet of
/// instances does not hit the providers in lockstep.
pub const INTERVAL_JITTER_SECS: u64 = 30;

/// One schedulable reconcile job.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run_cycle(&self) -> SyncCycleResult;
}

/// Runtime wrapper around one runner.
///
/// Serializes cycles within the process, retains the newest cycle result for
/// the stats surface, and owns the background loop task so shutdown can
/// abort it.
pub struct EngineHandle {
    runner: Arc<dyn SyncRunner>,
    interval: Duration,
    cycle_mutex: Mutex<()>,
    running: AtomicBool,
    last_cycle: RwLock<Option<SyncCycleResult>>,
    next_scheduled_at: RwLock<Option<DateTime<Utc>>>,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandle {
    pub fn new(runner: Arc<dyn SyncRunner>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            runner,
            interval,
            cycle_mutex: Mutex::new(()),
            running: AtomicBool::new(false),
            last_cycle: RwLock::new(None),
            next_scheduled_at: RwLock::new(None),
            background_task: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.runner.name()
    }

    /// Run one cycle now. Cycles never overlap within this process; a manual
    /// trigger waits for an in-flight background cycle to finish.
    pub async fn sync_now(&self) -> SyncCycleResult {
        let _serial = self.cycle_mutex.lock().await;
        self.running.store(true, Ordering::SeqCst);
        let result = self.runner.run_cycle().await;
        self.running.store(false, Ordering::SeqCst);
        *self.last_cycle.write().await = Some(result.clone());
        result
    }

    pub async fn stats(&self) -> SyncEngineStats {
        SyncEngineStats {
            engine: self.runner.name().to_string(),
            is_running: self.running.load(Ordering::SeqCst),
            last_cycle_result: self.last_cycle.read().await.clone(),
            next_scheduled_at: *self.next_scheduled_at.read().await,
        }
    }

    /// Start the periodic loop. No-op when already started.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.background_task.lock().await;
        if slot.is_some() {
            return;
        }
        let handle_ref = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!(
                "[Sync] {}: background loop started (every {}s, jitter up to {}s)",
                handle_ref.name(),
                handle_ref.interval.as_secs(),
                INTERVAL_JITTER_SECS
            );
            loop {
                let delay = handle_ref.interval + Duration::from_secs(cycle_jitter_secs());
                *handle_ref.next_scheduled_at.write().await =
                    Some(Utc::now() + ChronoDuration::from_std(delay).unwrap_or_default());
                tokio::time::sleep(delay).await;

                let result = handle_ref.sync_now().await;
                if result.errored > 0 || result.status == CycleStatus::Failed {
                    warn!(
                        "[Sync] {}: scheduled cycle ended {:?} with {} errored record(s)",
                        handle_ref.name(),
                        result.status,
                        result.errored
                    );
                }
            }
        });
        *slot = Some(task);
    }

    /// Abort the background loop. An in-flight cycle's lock still releases
    /// through the guard's drop path.
    pub async fn stop(&self) {
        if let Some(task) = self.background_task.lock().await.take() {
            task.abort();
            info!("[Sync] {}: background loop stopped", self.name());
            *self.next_scheduled_at.write().await = None;
        }
    }
}

/// Cheap wall-clock jitter, bounded by [`INTERVAL_JITTER_SECS`].
fn cycle_jitter_secs() -> u64 {
    (Utc::now().timestamp_millis() as u64) % (INTERVAL_JITTER_SECS + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..64 {
            assert!(cycle_jitter_secs() <= INTERVAL_JITTER_SECS);
        }
    }
}
