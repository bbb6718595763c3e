//! Advisory-lock backend over Postgres session locks.

use async_trait::async_trait;
use log::{debug, warn};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tokio::runtime::Handle;

use fleetmon_core::locks::{LockBackend, LockError, LockKey, LockSession};

/// Lock backend over `pg_try_advisory_lock`.
///
/// Every acquired lock pins one pool connection until release. Postgres
/// scopes advisory locks to the session, so when a holding connection dies,
/// crash or network cut included, the server frees its locks without any
/// cleanup protocol on our side.
pub struct PgAdvisoryLockBackend {
    pool: PgPool,
}

impl PgAdvisoryLockBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockBackend for PgAdvisoryLockBackend {
    async fn try_acquire(&self, key: LockKey) -> Result<Option<Box<dyn LockSession>>, LockError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|err| LockError::backend(err.to_string()))?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, $2)")
            .bind(key.key1)
            .bind(key.key2)
            .fetch_one(&mut *conn)
            .await
            .map_err(|err| LockError::backend(err.to_string()))?;
        if !acquired {
            // This connection took nothing; it goes back to the pool clean.
            return Ok(None);
        }
        Ok(Some(Box::new(PgLockSession {
            key,
            conn: Some(conn),
        })))
    }
}

/// One held advisory lock and the connection it lives on.
struct PgLockSession {
    key: LockKey,
    conn: Option<PoolConnection<Postgres>>,
}

impl PgLockSession {
    /// Remove `conn` from the pool for good and close it. Called whenever we
    /// cannot prove the lock is gone: a pooled connection still holding an
    /// advisory lock would carry it into unrelated queries.
    fn discard(conn: PoolConnection<Postgres>) {
        let raw = conn.detach();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = raw.close().await;
                });
            }
            // No runtime to close gracefully on. Dropping the detached
            // connection severs the socket and the server ends the session,
            // locks included.
            Err(_) => drop(raw),
        }
    }
}

#[async_trait]
impl LockSession for PgLockSession {
    async fn unlock(&mut self) -> Result<bool, LockError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(false);
        };
        let result: Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_advisory_unlock($1, $2)")
                .bind(self.key.key1)
                .bind(self.key.key2)
                .fetch_one(&mut *conn)
                .await;
        match result {
            Ok(released) => {
                debug!(
                    "[Locks] pg_advisory_unlock({}, {}) -> {}",
                    self.key.key1, self.key.key2, released
                );
                Ok(released)
            }
            Err(err) => {
                warn!(
                    "[Locks] Unlock of ({}, {}) failed, discarding its connection: {}",
                    self.key.key1, self.key.key2, err
                );
                Self::discard(conn);
                Err(LockError::backend(err.to_string()))
            }
        }
    }
}

impl Drop for PgLockSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            Self::discard(conn);
        }
    }
}
