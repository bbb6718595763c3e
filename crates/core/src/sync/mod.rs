//! Periodic reconciliation engines.
//!
//! Each engine pulls authoritative state from one remote system and merges
//! it into local storage under a cluster-wide advisory lock. Cycles are
//! strictly sequential per engine; a rate-limited response aborts the rest
//! of the batch instead of hammering an exhausted quota.

mod adapters;
mod engine;
mod model;
mod registry;
mod scheduler;
mod source;

pub use adapters::{
    resolve_counters, CounterResolution, DeviceTelemetryAdapter, TaskTrackerAdapter,
    DEVICE_TELEMETRY_ENGINE, TASK_TRACKER_ENGINE,
};
pub use engine::{PersistOutcome, SyncAdapter, SyncEngine};
pub use model::{CycleStatus, SyncCycleResult, SyncEngineStats};
pub use registry::SyncRegistry;
pub use scheduler::{EngineHandle, SyncRunner, INTERVAL_JITTER_SECS};
pub use source::{DeviceTelemetrySource, RemoteDevice, RemoteTask, SourceError, TaskTrackerSource};
