//! Guest Wi-Fi session correlation against the RADIUS accounting store.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::sync::{CycleStatus, SyncCycleResult, SyncRunner};
use crate::Result;

pub const RADIUS_BRIDGE_ENGINE: &str = "radius-accounting";

/// One accounting row as read from the RADIUS store.
#[derive(Debug, Clone)]
pub struct AccountingRecord {
    pub acct_session_id: String,
    pub username: String,
    pub client_mac: Option<String>,
    /// Cumulative octet counters for the session so far.
    pub input_octets: i64,
    pub output_octets: i64,
    pub started_at: Option<DateTime<Utc>>,
    /// Set once the RADIUS server has seen the session stop.
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Captive-portal session tracked locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSession {
    pub id: String,
    pub acct_session_id: String,
    pub client_mac: String,
    pub device_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub input_octets: i64,
    pub output_octets: i64,
}

/// Reads against the RADIUS accounting table.
#[async_trait]
pub trait RadiusAccountingSource: Send + Sync {
    /// Accounting rows touched since `since`, oldest first.
    async fn load_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<AccountingRecord>>;
}

/// Local guest session store.
#[async_trait]
pub trait GuestSessionRepository: Send + Sync {
    async fn find_open_by_acct_session(
        &self,
        acct_session_id: &str,
    ) -> Result<Option<GuestSession>>;

    /// Overwrite the octet counters of a live session.
    async fn update_usage(
        &self,
        session_id: &str,
        input_octets: i64,
        output_octets: i64,
    ) -> Result<()>;

    /// Mark a session stopped and record its final counters.
    async fn close_session(
        &self,
        session_id: &str,
        stopped_at: DateTime<Utc>,
        input_octets: i64,
        output_octets: i64,
    ) -> Result<()>;
}

/// Folds recent RADIUS accounting updates into the guest session rows.
///
/// Deliberately runs without the advisory lock: counters are written as
/// absolute values keyed by the accounting session, so two overlapping
/// cycles waste work but cannot corrupt state.
pub struct RadiusBridge {
    source: Arc<dyn RadiusAccountingSource>,
    sessions: Arc<dyn GuestSessionRepository>,
    lookback: ChronoDuration,
}

impl RadiusBridge {
    pub fn new(
        source: Arc<dyn RadiusAccountingSource>,
        sessions: Arc<dyn GuestSessionRepository>,
        lookback: std::time::Duration,
    ) -> Self {
        Self {
            source,
            sessions,
            lookback: ChronoDuration::from_std(lookback)
                .unwrap_or_else(|_| ChronoDuration::minutes(10)),
        }
    }

    /// Returns whether the record matched a local session.
    async fn correlate(&self, record: &AccountingRecord) -> Result<bool> {
        let Some(session) = self
            .sessions
            .find_open_by_acct_session(&record.acct_session_id)
            .await?
        else {
            return Ok(false);
        };
        match record.stopped_at {
            Some(stopped_at) => {
                self.sessions
                    .close_session(
                        &session.id,
                        stopped_at,
                        record.input_octets,
                        record.output_octets,
                    )
                    .await?;
            }
            None => {
                self.sessions
                    .update_usage(&session.id, record.input_octets, record.output_octets)
                    .await?;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl SyncRunner for RadiusBridge {
    fn name(&self) -> &'static str {
        RADIUS_BRIDGE_ENGINE
    }

    async fn run_cycle(&self) -> SyncCycleResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let since = started_at - self.lookback;

        let mut result = SyncCycleResult::started(RADIUS_BRIDGE_ENGINE, started_at);
        match self.source.load_updated_since(since).await {
            Err(err) => {
                warn!("[Radius] Failed to read accounting rows: {}", err);
                result.status = CycleStatus::Failed;
                result.message = Some(err.to_string());
            }
            Ok(records) => {
                info!(
                    "[Radius] Cycle started with {} accounting row(s) since {}",
                    records.len(),
                    since
                );
                for record in &records {
                    result.processed += 1;
                    match self.correlate(record).await {
                        Ok(true) => result.updated += 1,
                        // No local session for this accounting row. Normal
                        // for traffic that never went through the portal.
                        Ok(false) => result.skipped += 1,
                        Err(err) => {
                            warn!(
                                "[Radius] Correlation of '{}' failed: {}",
                                record.acct_session_id, err
                            );
                            result.errored += 1;
                        }
                    }
                }
            }
        }

        result.duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            "[Radius] Cycle finished ({:?}): {} processed, {} updated, {} unmatched, {} errored in {} ms",
            result.status,
            result.processed,
            result.updated,
            result.skipped,
            result.errored,
            result.duration_ms
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;
    use crate::errors::Error;

    struct FakeAccounting {
        records: Vec<AccountingRecord>,
        seen_since: StdMutex<Option<DateTime<Utc>>>,
        fail: bool,
    }

    #[async_trait]
    impl RadiusAccountingSource for FakeAccounting {
        async fn load_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<AccountingRecord>> {
            *self.seen_since.lock().unwrap() = Some(since);
            if self.fail {
                return Err(Error::storage("accounting store unreachable"));
            }
            Ok(self.records.clone())
        }
    }

    struct FakeSessions {
        open: StdMutex<HashMap<String, GuestSession>>,
        usage_updates: StdMutex<Vec<(String, i64, i64)>>,
        closes: StdMutex<Vec<(String, DateTime<Utc>, i64, i64)>>,
    }

    impl FakeSessions {
        fn with_open(sessions: Vec<GuestSession>) -> Arc<Self> {
            Arc::new(Self {
                open: StdMutex::new(
                    sessions
                        .into_iter()
                        .map(|s| (s.acct_session_id.clone(), s))
                        .collect(),
                ),
                usage_updates: StdMutex::new(Vec::new()),
                closes: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GuestSessionRepository for FakeSessions {
        async fn find_open_by_acct_session(
            &self,
            acct_session_id: &str,
        ) -> Result<Option<GuestSession>> {
            Ok(self.open.lock().unwrap().get(acct_session_id).cloned())
        }

        async fn update_usage(
            &self,
            session_id: &str,
            input_octets: i64,
            output_octets: i64,
        ) -> Result<()> {
            self.usage_updates.lock().unwrap().push((
                session_id.to_string(),
                input_octets,
                output_octets,
            ));
            Ok(())
        }

        async fn close_session(
            &self,
            session_id: &str,
            stopped_at: DateTime<Utc>,
            input_octets: i64,
            output_octets: i64,
        ) -> Result<()> {
            self.closes.lock().unwrap().push((
                session_id.to_string(),
                stopped_at,
                input_octets,
                output_octets,
            ));
            self.open
                .lock()
                .unwrap()
                .retain(|_, session| session.id != session_id);
            Ok(())
        }
    }

    fn open_session(id: &str, acct_session_id: &str) -> GuestSession {
        GuestSession {
            id: id.to_string(),
            acct_session_id: acct_session_id.to_string(),
            client_mac: "aa:bb:cc:dd:ee:ff".to_string(),
            device_id: Some("dev-001".to_string()),
            started_at: Utc::now() - ChronoDuration::minutes(30),
            stopped_at: None,
            input_octets: 0,
            output_octets: 0,
        }
    }

    fn accounting(acct_session_id: &str, stopped: bool) -> AccountingRecord {
        AccountingRecord {
            acct_session_id: acct_session_id.to_string(),
            username: "guest-17".to_string(),
            client_mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            input_octets: 10_000,
            output_octets: 64_000,
            started_at: Some(Utc::now() - ChronoDuration::minutes(30)),
            stopped_at: stopped.then(Utc::now),
        }
    }

    #[tokio::test]
    async fn updates_open_sessions_and_closes_stopped_ones() {
        let sessions = FakeSessions::with_open(vec![
            open_session("gs-1", "radius-1"),
            open_session("gs-2", "radius-2"),
        ]);
        let source = Arc::new(FakeAccounting {
            records: vec![
                accounting("radius-1", false),
                accounting("radius-2", true),
                accounting("radius-9", false),
            ],
            seen_since: StdMutex::new(None),
            fail: false,
        });
        let bridge = RadiusBridge::new(
            Arc::clone(&source) as Arc<dyn RadiusAccountingSource>,
            Arc::clone(&sessions) as Arc<dyn GuestSessionRepository>,
            Duration::from_secs(600),
        );

        let result = bridge.run_cycle().await;

        assert_eq!(result.status, CycleStatus::Completed);
        assert_eq!(result.processed, 3);
        assert_eq!(result.updated, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errored, 0);

        let updates = sessions.usage_updates.lock().unwrap().clone();
        assert_eq!(updates, vec![("gs-1".to_string(), 10_000, 64_000)]);

        let closes = sessions.closes.lock().unwrap().clone();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].0, "gs-2");
        assert!(sessions.open.lock().unwrap().get("radius-2").is_none());
    }

    #[tokio::test]
    async fn lookback_window_bounds_the_accounting_read() {
        let sessions = FakeSessions::with_open(Vec::new());
        let source = Arc::new(FakeAccounting {
            records: Vec::new(),
            seen_since: StdMutex::new(None),
            fail: false,
        });
        let bridge = RadiusBridge::new(
            Arc::clone(&source) as Arc<dyn RadiusAccountingSource>,
            sessions,
            Duration::from_secs(600),
        );

        bridge.run_cycle().await;
        let after = Utc::now();

        let since = source.seen_since.lock().unwrap().expect("source queried");
        let age = after - since;
        assert!(age >= ChronoDuration::minutes(10));
        assert!(age < ChronoDuration::minutes(11));
    }

    #[tokio::test]
    async fn unreachable_accounting_store_fails_the_cycle() {
        let sessions = FakeSessions::with_open(Vec::new());
        let source = Arc::new(FakeAccounting {
            records: Vec::new(),
            seen_since: StdMutex::new(None),
            fail: true,
        });
        let bridge = RadiusBridge::new(
            source,
            sessions,
            Duration::from_secs(600),
        );

        let result = bridge.run_cycle().await;
        assert_eq!(result.status, CycleStatus::Failed);
        assert!(result.message.is_some());
        assert_eq!(result.processed, 0);
    }
}
