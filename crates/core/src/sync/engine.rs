//! Generic reconcile cycle shared by the sync engines.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use super::model::{CycleStatus, SyncCycleResult};
use super::scheduler::SyncRunner;
use super::source::SourceError;
use crate::devices::{Device, DeviceRepositoryTrait};
use crate::locks::AdvisoryLockService;

/// One engine variant: what to load, what to fetch, what to write.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    type Remote: Send;

    /// Engine name, also the advisory lock suffix ("sync:<name>").
    fn name(&self) -> &'static str;

    /// Working set for one cycle. Protected manual statuses are excluded at
    /// query time; the per-record re-check catches changes made later.
    async fn load_batch(&self) -> crate::Result<Vec<Device>>;

    async fn fetch_remote(&self, device: &Device) -> Result<Self::Remote, SourceError>;

    /// Write the reconciled record.
    async fn persist(&self, device: &Device, remote: Self::Remote) -> crate::Result<PersistOutcome>;
}

/// What a persist call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Updated,
    Unchanged,
}

enum RecordOutcome {
    Updated,
    Unchanged,
    SkippedManual,
}

/// Drives one adapter through the shared cycle algorithm: take the engine
/// lock, walk the batch strictly in order, re-check the manual status before
/// every write, and abort the remainder on a rate limit.
pub struct SyncEngine<A: SyncAdapter> {
    adapter: A,
    locks: Arc<AdvisoryLockService>,
    devices: Arc<dyn DeviceRepositoryTrait>,
}

impl<A: SyncAdapter> SyncEngine<A> {
    pub fn new(
        adapter: A,
        locks: Arc<AdvisoryLockService>,
        devices: Arc<dyn DeviceRepositoryTrait>,
    ) -> Self {
        Self {
            adapter,
            locks,
            devices,
        }
    }

    fn lock_name(&self) -> String {
        format!("sync:{}", self.adapter.name())
    }

    async fn run_batch(&self, result: &mut SyncCycleResult) {
        let name = self.adapter.name();
        let batch = match self.adapter.load_batch().await {
            Ok(batch) => batch,
            Err(err) => {
                warn!("[Sync] {}: failed to load working set: {}", name, err);
                result.status = CycleStatus::Failed;
                result.message = Some(err.to_string());
                return;
            }
        };
        info!("[Sync] {}: cycle started with {} record(s)", name, batch.len());

        for device in &batch {
            match self.adapter.fetch_remote(device).await {
                Err(SourceError::RateLimited { retry_after_secs }) => {
                    // Circuit breaker: the provider told us to stop, so the
                    // rest of the batch waits for the next cycle.
                    warn!(
                        "[Sync] {}: rate limited at {} (retry after {:?}s); dropping remaining batch",
                        name, device.external_id, retry_after_secs
                    );
                    result.rate_limited = true;
                    result.status = CycleStatus::RateLimited;
                    return;
                }
                Err(err) => {
                    warn!("[Sync] {}: fetch for {} failed: {}", name, device.external_id, err);
                    result.processed += 1;
                    result.errored += 1;
                }
                Ok(remote) => {
                    result.processed += 1;
                    match self.reconcile(device, remote).await {
                        Ok(RecordOutcome::Updated) => result.updated += 1,
                        Ok(RecordOutcome::Unchanged) => {}
                        Ok(RecordOutcome::SkippedManual) => result.skipped += 1,
                        Err(err) => {
                            warn!(
                                "[Sync] {}: write for {} failed: {}",
                                name, device.external_id, err
                            );
                            result.errored += 1;
                        }
                    }
                }
            }
        }
    }

    async fn reconcile(&self, device: &Device, remote: A::Remote) -> crate::Result<RecordOutcome> {
        // Fresh read, never the batch snapshot: a user may have set a manual
        // status while earlier records were being processed.
        if let Some(manual) = self.devices.get_manual_status(&device.id).await? {
            info!(
                "[Sync] {}: skipping {}: manual status '{}' set mid-cycle (race condition prevented)",
                self.adapter.name(),
                device.external_id,
                manual.as_str()
            );
            return Ok(RecordOutcome::SkippedManual);
        }
        match self.adapter.persist(device, remote).await? {
            PersistOutcome::Updated => Ok(RecordOutcome::Updated),
            PersistOutcome::Unchanged => Ok(RecordOutcome::Unchanged),
        }
    }
}

#[async_trait]
impl<A: SyncAdapter> SyncRunner for SyncEngine<A> {
    fn name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Run one cycle. Never returns an error: every failure mode lands in
    /// the cycle result.
    async fn run_cycle(&self) -> SyncCycleResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let lock_name = self.lock_name();

        let Some(guard) = self.locks.acquire_scoped(&lock_name).await else {
            debug!(
                "[Sync] {}: cycle skipped, '{}' is held elsewhere",
                self.adapter.name(),
                lock_name
            );
            return SyncCycleResult::already_running(self.adapter.name(), started_at);
        };

        let mut result = SyncCycleResult::started(self.adapter.name(), started_at);
        self.run_batch(&mut result).await;
        guard.release().await;

        result.duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            "[Sync] {}: cycle finished ({:?}): {} processed, {} updated, {} skipped, {} errored in {} ms",
            self.adapter.name(),
            result.status,
            result.processed,
            result.updated,
            result.skipped,
            result.errored,
            result.duration_ms
        );
        result
    }
}
