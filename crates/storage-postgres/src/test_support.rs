//! Shared scaffolding for tests that need a live database.

use crate::db::PostgresStore;

/// Minimal cut of the FreeRADIUS accounting table. Production reads the real
/// one; tests need their own copy to write fixtures into.
const RADACCT_DDL: &str = "CREATE TABLE IF NOT EXISTS radacct (
    radacctid BIGSERIAL PRIMARY KEY,
    acctsessionid TEXT NOT NULL,
    username TEXT NOT NULL DEFAULT '',
    callingstationid TEXT,
    acctstarttime TIMESTAMPTZ,
    acctupdatetime TIMESTAMPTZ,
    acctstoptime TIMESTAMPTZ,
    acctinputoctets BIGINT,
    acctoutputoctets BIGINT
)";

/// Store for integration tests, or `None` when `DATABASE_URL` is unset.
///
/// Point it at a throwaway database:
/// `DATABASE_URL=postgres://localhost/fleetmon_test cargo test`.
/// Tests share tables and run in parallel, so every test works with its own
/// row ids.
pub(crate) async fn test_store() -> Option<PostgresStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let url = url.trim().to_string();
    if url.is_empty() {
        return None;
    }
    let store = PostgresStore::connect(&url)
        .await
        .expect("test database should accept connections");
    store.migrate().await.expect("schema should apply");
    sqlx::query(RADACCT_DDL)
        .execute(store.pool())
        .await
        .expect("radacct fixture table should apply");
    Some(store)
}
