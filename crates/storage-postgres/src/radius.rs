//! RADIUS accounting reads and the guest session store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use sqlx::PgPool;

use fleetmon_core::radius::{
    AccountingRecord, GuestSession, GuestSessionRepository, RadiusAccountingSource,
};
use fleetmon_core::Result;

use crate::errors::StorageError;

/// Row shape of the FreeRADIUS accounting table. Octet counters are nullable
/// there; an interim row without them reads as zero usage.
#[derive(sqlx::FromRow)]
struct RadacctRow {
    acctsessionid: String,
    username: String,
    callingstationid: Option<String>,
    acctinputoctets: Option<i64>,
    acctoutputoctets: Option<i64>,
    acctstarttime: Option<DateTime<Utc>>,
    acctstoptime: Option<DateTime<Utc>>,
}

impl From<RadacctRow> for AccountingRecord {
    fn from(row: RadacctRow) -> Self {
        AccountingRecord {
            acct_session_id: row.acctsessionid,
            username: row.username,
            client_mac: row.callingstationid,
            input_octets: row.acctinputoctets.unwrap_or(0),
            output_octets: row.acctoutputoctets.unwrap_or(0),
            started_at: row.acctstarttime,
            stopped_at: row.acctstoptime,
        }
    }
}

/// Read-only view of the accounting table FreeRADIUS writes.
///
/// Deployments with a separate accounting server construct this from a pool
/// on that server; everyone else shares the dashboard pool.
#[derive(Clone)]
pub struct PgRadiusAccountingSource {
    pool: PgPool,
}

impl PgRadiusAccountingSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RadiusAccountingSource for PgRadiusAccountingSource {
    async fn load_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<AccountingRecord>> {
        // Stop and interim updates both move a row's latest timestamp; start
        // records carry only acctstarttime.
        let rows = sqlx::query_as::<_, RadacctRow>(
            "SELECT acctsessionid, username, callingstationid, acctinputoctets,
                    acctoutputoctets, acctstarttime, acctstoptime
            FROM radacct
            WHERE COALESCE(acctstoptime, acctupdatetime, acctstarttime) >= $1
            ORDER BY COALESCE(acctstoptime, acctupdatetime, acctstarttime)",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(AccountingRecord::from).collect())
    }
}

#[derive(sqlx::FromRow)]
struct GuestSessionRow {
    id: String,
    acct_session_id: String,
    client_mac: String,
    device_id: Option<String>,
    started_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
    input_octets: i64,
    output_octets: i64,
}

impl From<GuestSessionRow> for GuestSession {
    fn from(row: GuestSessionRow) -> Self {
        GuestSession {
            id: row.id,
            acct_session_id: row.acct_session_id,
            client_mac: row.client_mac,
            device_id: row.device_id,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
            input_octets: row.input_octets,
            output_octets: row.output_octets,
        }
    }
}

/// Postgres-backed guest session store.
#[derive(Clone)]
pub struct PgGuestSessionRepository {
    pool: PgPool,
}

impl PgGuestSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GuestSessionRepository for PgGuestSessionRepository {
    async fn find_open_by_acct_session(
        &self,
        acct_session_id: &str,
    ) -> Result<Option<GuestSession>> {
        // A reused accounting id resolves to the newest open session.
        let row = sqlx::query_as::<_, GuestSessionRow>(
            "SELECT id, acct_session_id, client_mac, device_id, started_at,
                    stopped_at, input_octets, output_octets
            FROM guest_sessions
            WHERE acct_session_id = $1 AND stopped_at IS NULL
            ORDER BY started_at DESC
            LIMIT 1",
        )
        .bind(acct_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(GuestSession::from))
    }

    async fn update_usage(
        &self,
        session_id: &str,
        input_octets: i64,
        output_octets: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE guest_sessions SET input_octets = $2, output_octets = $3 WHERE id = $1",
        )
        .bind(session_id)
        .bind(input_octets)
        .bind(output_octets)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        if result.rows_affected() == 0 {
            warn!("[Radius] Usage write for unknown session {}", session_id);
        }
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: &str,
        stopped_at: DateTime<Utc>,
        input_octets: i64,
        output_octets: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE guest_sessions
            SET stopped_at = $2, input_octets = $3, output_octets = $4
            WHERE id = $1",
        )
        .bind(session_id)
        .bind(stopped_at)
        .bind(input_octets)
        .bind(output_octets)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        if result.rows_affected() == 0 {
            warn!("[Radius] Close for unknown session {}", session_id);
        }
        Ok(())
    }
}
