//! Engine variants: device telemetry and task tracker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::debug;

use super::engine::{PersistOutcome, SyncAdapter};
use super::source::{DeviceTelemetrySource, RemoteDevice, RemoteTask, SourceError, TaskTrackerSource};
use crate::devices::{Device, DeviceRepositoryTrait, DeviceStatus, TaskStateUpdate, TelemetryUpdate};

pub const DEVICE_TELEMETRY_ENGINE: &str = "device-telemetry";
pub const TASK_TRACKER_ENGINE: &str = "task-tracker";

// ─────────────────────────────────────────────────────────────────────────
// Device telemetry
// ─────────────────────────────────────────────────────────────────────────

/// Reconciles platform telemetry (status, signal, firmware, counters) into
/// local device rows.
pub struct DeviceTelemetryAdapter {
    source: Arc<dyn DeviceTelemetrySource>,
    devices: Arc<dyn DeviceRepositoryTrait>,
    counter_staleness: ChronoDuration,
}

impl DeviceTelemetryAdapter {
    pub fn new(
        source: Arc<dyn DeviceTelemetrySource>,
        devices: Arc<dyn DeviceRepositoryTrait>,
        counter_staleness: std::time::Duration,
    ) -> Self {
        Self {
            source,
            devices,
            counter_staleness: ChronoDuration::from_std(counter_staleness)
                .unwrap_or_else(|_| ChronoDuration::hours(24)),
        }
    }
}

#[async_trait]
impl SyncAdapter for DeviceTelemetryAdapter {
    type Remote = RemoteDevice;

    fn name(&self) -> &'static str {
        DEVICE_TELEMETRY_ENGINE
    }

    async fn load_batch(&self) -> crate::Result<Vec<Device>> {
        self.devices.load_telemetry_batch().await
    }

    async fn fetch_remote(&self, device: &Device) -> Result<RemoteDevice, SourceError> {
        self.source.fetch_device(&device.external_id).await
    }

    async fn persist(
        &self,
        device: &Device,
        remote: RemoteDevice,
    ) -> crate::Result<PersistOutcome> {
        let now = Utc::now();
        let counters = resolve_counters(
            remote.tx_bytes,
            remote.rx_bytes,
            device,
            now,
            self.counter_staleness,
        );
        if counters.substituted {
            debug!(
                "[DeviceSync] {}: zero counters from platform; keeping local sample from {:?}",
                device.external_id, device.counters_updated_at
            );
        }

        let update = TelemetryUpdate {
            external_id: device.external_id.clone(),
            name: remote.name,
            computed_status: DeviceStatus::from_remote(remote.status.as_deref()),
            signal_dbm: remote.signal_dbm,
            firmware_version: remote.firmware_version,
            last_seen_at: remote.last_update,
            tx_bytes: counters.tx_bytes,
            rx_bytes: counters.rx_bytes,
            counters_updated_at: counters.sampled_at,
        };
        self.devices.upsert_telemetry(update).await?;
        Ok(PersistOutcome::Updated)
    }
}

/// Resolved traffic counters for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterResolution {
    pub tx_bytes: i64,
    pub rx_bytes: i64,
    /// Timestamp of the sample these values came from.
    pub sampled_at: Option<DateTime<Utc>>,
    /// The remote report was discarded in favor of the local sample.
    pub substituted: bool,
}

/// Counter policy for spurious zero reports.
///
/// Cumulative counters that suddenly read zero usually mean a platform
/// glitch rather than real traffic. The last local sample stands in, but
/// only while it is younger than `staleness`; past that, zero is accepted
/// as the truth (a reset, or a device that really went quiet).
pub fn resolve_counters(
    remote_tx: i64,
    remote_rx: i64,
    local: &Device,
    now: DateTime<Utc>,
    staleness: ChronoDuration,
) -> CounterResolution {
    if remote_tx != 0 || remote_rx != 0 {
        return CounterResolution {
            tx_bytes: remote_tx,
            rx_bytes: remote_rx,
            sampled_at: Some(now),
            substituted: false,
        };
    }
    match local.counters_updated_at {
        Some(sampled_at) if now.signed_duration_since(sampled_at) < staleness => {
            CounterResolution {
                tx_bytes: local.tx_bytes,
                rx_bytes: local.rx_bytes,
                // The carried-forward values keep their original sample
                // time, so the fallback cannot renew itself forever.
                sampled_at: Some(sampled_at),
                substituted: true,
            }
        }
        _ => CounterResolution {
            tx_bytes: 0,
            rx_bytes: 0,
            sampled_at: Some(now),
            substituted: false,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Task tracker
// ─────────────────────────────────────────────────────────────────────────

/// Reconciles project-tracker task state onto the devices linked to those
/// tasks.
pub struct TaskTrackerAdapter {
    source: Arc<dyn TaskTrackerSource>,
    devices: Arc<dyn DeviceRepositoryTrait>,
}

impl TaskTrackerAdapter {
    pub fn new(source: Arc<dyn TaskTrackerSource>, devices: Arc<dyn DeviceRepositoryTrait>) -> Self {
        Self { source, devices }
    }
}

#[async_trait]
impl SyncAdapter for TaskTrackerAdapter {
    type Remote = RemoteTask;

    fn name(&self) -> &'static str {
        TASK_TRACKER_ENGINE
    }

    async fn load_batch(&self) -> crate::Result<Vec<Device>> {
        self.devices.load_task_batch().await
    }

    async fn fetch_remote(&self, device: &Device) -> Result<RemoteTask, SourceError> {
        // The batch query guarantees a task id; a missing one here means the
        // link was cleared mid-cycle.
        let Some(task_id) = device.tracker_task_id.as_deref() else {
            return Err(SourceError::NotFound);
        };
        self.source.fetch_task(task_id).await
    }

    async fn persist(&self, device: &Device, remote: RemoteTask) -> crate::Result<PersistOutcome> {
        if device.tracker_status.as_deref() == Some(remote.status.as_str()) {
            return Ok(PersistOutcome::Unchanged);
        }
        let update = TaskStateUpdate {
            device_id: device.id.clone(),
            tracker_status: remote.status,
            tracker_synced_at: Utc::now(),
        };
        self.devices.apply_task_state(update).await?;
        Ok(PersistOutcome::Updated)
    }
}
