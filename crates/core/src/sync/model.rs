//! Cycle results and engine status types surfaced to the dashboard layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of one reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    RateLimited,
    AlreadyRunning,
    Failed,
}

/// Summary of one cycle. The newest one per engine is kept in memory for
/// the stats surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleResult {
    pub engine: String,
    pub status: CycleStatus,
    /// Records fully attempted this cycle.
    pub processed: usize,
    pub updated: usize,
    /// Records skipped because a protected manual status appeared.
    pub skipped: usize,
    pub errored: usize,
    /// The cycle hit the provider's rate limit and dropped the rest of the
    /// batch.
    pub rate_limited: bool,
    /// Another instance (or this one) held the lock; nothing ran.
    pub already_running: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl SyncCycleResult {
    /// Empty result for a cycle that is about to process records.
    pub fn started(engine: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            engine: engine.to_string(),
            status: CycleStatus::Completed,
            processed: 0,
            updated: 0,
            skipped: 0,
            errored: 0,
            rate_limited: false,
            already_running: false,
            started_at,
            duration_ms: 0,
            message: None,
        }
    }

    /// Result for a cycle that never started because the lock was held.
    pub fn already_running(engine: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            status: CycleStatus::AlreadyRunning,
            already_running: true,
            ..Self::started(engine, started_at)
        }
    }

    /// Result for a cycle that failed before processing any record.
    pub fn failed(engine: &str, started_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            status: CycleStatus::Failed,
            message: Some(message.into()),
            ..Self::started(engine, started_at)
        }
    }
}

/// Engine view exposed through the HTTP layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineStats {
    pub engine: String,
    pub is_running: bool,
    pub last_cycle_result: Option<SyncCycleResult>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}
