//! Pool ownership and schema bootstrap.

use std::time::Duration;

use log::info;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::devices::PgDeviceRepository;
use crate::errors::StorageError;
use crate::locks::PgAdvisoryLockBackend;
use crate::radius::{PgGuestSessionRepository, PgRadiusAccountingSource};
use crate::tokens::PgTokenRepository;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Tables owned by the dashboard. The RADIUS accounting table is absent on
/// purpose; FreeRADIUS owns that schema and we only read it.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS devices (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        site TEXT,
        firmware_version TEXT,
        signal_dbm INTEGER,
        last_seen_at TIMESTAMPTZ,
        computed_status TEXT NOT NULL DEFAULT 'unknown',
        manual_status TEXT,
        tracker_task_id TEXT,
        tracker_status TEXT,
        tracker_synced_at TIMESTAMPTZ,
        tx_bytes BIGINT NOT NULL DEFAULT 0,
        rx_bytes BIGINT NOT NULL DEFAULT 0,
        counters_updated_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_devices_tracker_task
        ON devices (tracker_task_id) WHERE tracker_task_id IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS oauth_tokens (
        provider TEXT NOT NULL,
        user_id TEXT NOT NULL,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        token_type TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        scope TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (provider, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS guest_sessions (
        id TEXT PRIMARY KEY,
        acct_session_id TEXT NOT NULL,
        client_mac TEXT NOT NULL,
        device_id TEXT,
        started_at TIMESTAMPTZ NOT NULL,
        stopped_at TIMESTAMPTZ,
        input_octets BIGINT NOT NULL DEFAULT 0,
        output_octets BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_guest_sessions_open
        ON guest_sessions (acct_session_id) WHERE stopped_at IS NULL",
];

/// Shared handle on the dashboard database.
///
/// Clones share one pool, so every repository and the lock backend can be
/// handed out by value.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and size the pool. Does not touch the schema; call
    /// [`migrate`](Self::migrate) for that.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(database_url)
            .await?;
        info!(
            "[Storage] Connected to Postgres (pool of {})",
            MAX_CONNECTIONS
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool, for callers that configure their own.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round trip to the server, for readiness probes.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create missing tables and indexes. Safe to run on every startup.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("[Storage] Schema is up to date");
        Ok(())
    }

    pub fn devices(&self) -> PgDeviceRepository {
        PgDeviceRepository::new(self.pool.clone())
    }

    pub fn tokens(&self) -> PgTokenRepository {
        PgTokenRepository::new(self.pool.clone())
    }

    pub fn guest_sessions(&self) -> PgGuestSessionRepository {
        PgGuestSessionRepository::new(self.pool.clone())
    }

    /// Accounting reads default to the dashboard pool. Deployments that keep
    /// FreeRADIUS on its own server construct the source from a second pool.
    pub fn radius_accounting(&self) -> PgRadiusAccountingSource {
        PgRadiusAccountingSource::new(self.pool.clone())
    }

    pub fn lock_backend(&self) -> PgAdvisoryLockBackend {
        PgAdvisoryLockBackend::new(self.pool.clone())
    }
}
