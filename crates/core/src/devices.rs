//! Device domain model shared by the sync engines and the storage layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Status computed from platform telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Idle,
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Idle => "idle",
            DeviceStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(DeviceStatus::Online),
            "offline" => Some(DeviceStatus::Offline),
            "idle" => Some(DeviceStatus::Idle),
            "unknown" => Some(DeviceStatus::Unknown),
            _ => None,
        }
    }

    /// Map the platform's connection state string onto our status set.
    pub fn from_remote(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("online") | Some("connected") => DeviceStatus::Online,
            Some("offline") | Some("disconnected") => DeviceStatus::Offline,
            Some("idle") | Some("dormant") => DeviceStatus::Idle,
            _ => DeviceStatus::Unknown,
        }
    }
}

/// Statuses only a user can put on a device.
///
/// This enum is the single definition of "protected": the batch query filter
/// and the pre-write re-check both consult it, so the two filters cannot
/// drift apart. The automatic sync path never writes over a device that
/// carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualStatus {
    BeingReturned,
    Decommissioned,
    Repair,
}

impl ManualStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManualStatus::BeingReturned => "being_returned",
            ManualStatus::Decommissioned => "decommissioned",
            ManualStatus::Repair => "repair",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "being_returned" => Some(ManualStatus::BeingReturned),
            "decommissioned" => Some(ManualStatus::Decommissioned),
            "repair" => Some(ManualStatus::Repair),
            _ => None,
        }
    }

    /// Every protected value, as stored. Query filters bind this list.
    pub fn protected_values() -> Vec<String> {
        [
            ManualStatus::BeingReturned,
            ManualStatus::Decommissioned,
            ManualStatus::Repair,
        ]
        .iter()
        .map(|status| status.as_str().to_string())
        .collect()
    }
}

/// One tracked device as the dashboard sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    /// Identifier on the device management platform.
    pub external_id: String,
    pub name: String,
    pub site: Option<String>,
    pub firmware_version: Option<String>,
    pub signal_dbm: Option<i32>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub computed_status: DeviceStatus,
    pub manual_status: Option<ManualStatus>,
    /// Linked task in the project tracker, when one exists.
    pub tracker_task_id: Option<String>,
    pub tracker_status: Option<String>,
    pub tracker_synced_at: Option<DateTime<Utc>>,
    pub tx_bytes: i64,
    pub rx_bytes: i64,
    /// When the traffic counters were last taken from a real platform
    /// sample, as opposed to carried forward.
    pub counters_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the device telemetry engine writes back.
#[derive(Debug, Clone)]
pub struct TelemetryUpdate {
    pub external_id: String,
    pub name: Option<String>,
    pub computed_status: DeviceStatus,
    pub signal_dbm: Option<i32>,
    pub firmware_version: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub tx_bytes: i64,
    pub rx_bytes: i64,
    pub counters_updated_at: Option<DateTime<Utc>>,
}

/// Fields the task tracker engine writes back.
#[derive(Debug, Clone)]
pub struct TaskStateUpdate {
    pub device_id: String,
    pub tracker_status: String,
    pub tracker_synced_at: DateTime<Utc>,
}

/// Store operations the engines need. Implemented by the Postgres layer and
/// by in-memory fakes in tests.
#[async_trait]
pub trait DeviceRepositoryTrait: Send + Sync {
    /// Devices eligible for a telemetry cycle. Protected manual statuses are
    /// excluded here, at query time.
    async fn load_telemetry_batch(&self) -> Result<Vec<Device>>;

    /// Devices with a linked tracker task, protected ones excluded.
    async fn load_task_batch(&self) -> Result<Vec<Device>>;

    /// Current manual status straight from the store, bypassing any batch
    /// snapshot. The engines call this immediately before each write.
    async fn get_manual_status(&self, device_id: &str) -> Result<Option<ManualStatus>>;

    async fn upsert_telemetry(&self, update: TelemetryUpdate) -> Result<()>;

    async fn apply_task_state(&self, update: TaskStateUpdate) -> Result<()>;

    /// User-driven override. Clearing it puts the device back under
    /// automatic sync on the next cycle.
    async fn set_manual_status(&self, device_id: &str, status: Option<ManualStatus>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_status_round_trips_through_storage_form() {
        for value in ManualStatus::protected_values() {
            let parsed = ManualStatus::parse(&value).expect("known value parses");
            assert_eq!(parsed.as_str(), value);
        }
        assert_eq!(ManualStatus::parse("online"), None);
    }

    #[test]
    fn remote_connection_states_map_onto_status_set() {
        assert_eq!(DeviceStatus::from_remote(Some("Connected")), DeviceStatus::Online);
        assert_eq!(DeviceStatus::from_remote(Some("offline")), DeviceStatus::Offline);
        assert_eq!(DeviceStatus::from_remote(Some("something-new")), DeviceStatus::Unknown);
        assert_eq!(DeviceStatus::from_remote(None), DeviceStatus::Unknown);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ManualStatus::BeingReturned).unwrap(),
            "\"being_returned\""
        );
        assert_eq!(
            serde_json::to_string(&DeviceStatus::Online).unwrap(),
            "\"online\""
        );
    }
}
