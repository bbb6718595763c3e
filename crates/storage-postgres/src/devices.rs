//! Device repository over the `devices` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use sqlx::PgPool;
use uuid::Uuid;

use fleetmon_core::devices::{
    Device, DeviceRepositoryTrait, DeviceStatus, ManualStatus, TaskStateUpdate, TelemetryUpdate,
};
use fleetmon_core::{Error, Result};

use crate::errors::StorageError;

/// Row shape as stored. Status columns stay TEXT until mapping so one odd
/// row cannot fail a whole batch.
#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: String,
    external_id: String,
    name: String,
    site: Option<String>,
    firmware_version: Option<String>,
    signal_dbm: Option<i32>,
    last_seen_at: Option<DateTime<Utc>>,
    computed_status: String,
    manual_status: Option<String>,
    tracker_task_id: Option<String>,
    tracker_status: Option<String>,
    tracker_synced_at: Option<DateTime<Utc>>,
    tx_bytes: i64,
    rx_bytes: i64,
    counters_updated_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        let manual_status = parse_manual_status(&row.id, row.manual_status.as_deref());
        let computed_status =
            DeviceStatus::parse(&row.computed_status).unwrap_or(DeviceStatus::Unknown);
        Device {
            id: row.id,
            external_id: row.external_id,
            name: row.name,
            site: row.site,
            firmware_version: row.firmware_version,
            signal_dbm: row.signal_dbm,
            last_seen_at: row.last_seen_at,
            computed_status,
            manual_status,
            tracker_task_id: row.tracker_task_id,
            tracker_status: row.tracker_status,
            tracker_synced_at: row.tracker_synced_at,
            tx_bytes: row.tx_bytes,
            rx_bytes: row.rx_bytes,
            counters_updated_at: row.counters_updated_at,
            updated_at: row.updated_at,
        }
    }
}

/// A stored value outside the enum leaves the device unprotected, the same
/// outcome the batch filter produces for it, and gets logged once per read.
fn parse_manual_status(device_id: &str, value: Option<&str>) -> Option<ManualStatus> {
    let value = value?;
    let parsed = ManualStatus::parse(value);
    if parsed.is_none() {
        warn!(
            "[Storage] Device {} carries unknown manual status '{}'",
            device_id, value
        );
    }
    parsed
}

const DEVICE_SELECT: &str = "SELECT id, external_id, name, site, firmware_version, signal_dbm,
        last_seen_at, computed_status, manual_status, tracker_task_id,
        tracker_status, tracker_synced_at, tx_bytes, rx_bytes,
        counters_updated_at, updated_at
    FROM devices";

/// Postgres-backed device repository.
#[derive(Clone)]
pub struct PgDeviceRepository {
    pool: PgPool,
}

impl PgDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRepositoryTrait for PgDeviceRepository {
    async fn load_telemetry_batch(&self) -> Result<Vec<Device>> {
        let sql = format!(
            "{DEVICE_SELECT}
            WHERE manual_status IS NULL OR manual_status <> ALL($1)
            ORDER BY external_id"
        );
        let rows = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(ManualStatus::protected_values())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn load_task_batch(&self) -> Result<Vec<Device>> {
        let sql = format!(
            "{DEVICE_SELECT}
            WHERE tracker_task_id IS NOT NULL
              AND (manual_status IS NULL OR manual_status <> ALL($1))
            ORDER BY external_id"
        );
        let rows = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(ManualStatus::protected_values())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn get_manual_status(&self, device_id: &str) -> Result<Option<ManualStatus>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT manual_status FROM devices WHERE id = $1")
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(parse_manual_status(device_id, value.flatten().as_deref()))
    }

    async fn upsert_telemetry(&self, update: TelemetryUpdate) -> Result<()> {
        // New rows fall back to the external id as a display name; existing
        // rows keep their stored name and firmware when the update carries
        // none.
        sqlx::query(
            "INSERT INTO devices (
                id, external_id, name, computed_status, signal_dbm,
                firmware_version, last_seen_at, tx_bytes, rx_bytes,
                counters_updated_at, updated_at
            ) VALUES ($1, $2, COALESCE($3, $2), $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (external_id) DO UPDATE SET
                name = COALESCE($3, devices.name),
                computed_status = EXCLUDED.computed_status,
                signal_dbm = EXCLUDED.signal_dbm,
                firmware_version = COALESCE($6, devices.firmware_version),
                last_seen_at = COALESCE($7, devices.last_seen_at),
                tx_bytes = EXCLUDED.tx_bytes,
                rx_bytes = EXCLUDED.rx_bytes,
                counters_updated_at = EXCLUDED.counters_updated_at,
                updated_at = NOW()",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&update.external_id)
        .bind(&update.name)
        .bind(update.computed_status.as_str())
        .bind(update.signal_dbm)
        .bind(&update.firmware_version)
        .bind(update.last_seen_at)
        .bind(update.tx_bytes)
        .bind(update.rx_bytes)
        .bind(update.counters_updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn apply_task_state(&self, update: TaskStateUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices
            SET tracker_status = $2, tracker_synced_at = $3, updated_at = NOW()
            WHERE id = $1",
        )
        .bind(&update.device_id)
        .bind(&update.tracker_status)
        .bind(update.tracker_synced_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        if result.rows_affected() == 0 {
            warn!(
                "[Storage] Task state write for unknown device {}",
                update.device_id
            );
        }
        Ok(())
    }

    async fn set_manual_status(&self, device_id: &str, status: Option<ManualStatus>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET manual_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(device_id)
        .bind(status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        if result.rows_affected() == 0 {
            return Err(Error::storage(format!("device '{}' does not exist", device_id)));
        }
        Ok(())
    }
}
