//! Remote-side contracts the engines pull from.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Why a remote fetch failed, as the engines see it.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Provider quota exhausted. Fatal to the whole cycle.
    #[error("remote rate limit hit")]
    RateLimited { retry_after_secs: Option<u64> },

    /// No remote counterpart for this record
    #[error("remote record not found")]
    NotFound,

    /// Transient or terminal remote failure, after client-side retries
    #[error("remote call failed: {0}")]
    Remote(String),
}

/// Telemetry snapshot for one device, as reported by the device platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDevice {
    pub external_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Raw connection state string; mapped onto our status set.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub signal_dbm: Option<i32>,
    #[serde(default)]
    pub tx_bytes: i64,
    #[serde(default)]
    pub rx_bytes: i64,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// Task record from the project tracker.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTask {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub custom_fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-device telemetry reads against the device management platform.
#[async_trait]
pub trait DeviceTelemetrySource: Send + Sync {
    async fn fetch_device(&self, external_id: &str) -> Result<RemoteDevice, SourceError>;
}

/// Task reads against the project tracker.
#[async_trait]
pub trait TaskTrackerSource: Send + Sync {
    async fn fetch_task(&self, task_id: &str) -> Result<RemoteTask, SourceError>;
}
