use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use super::*;
use crate::locks::{AdvisoryLockService, MemoryLockBackend};
use crate::Error;

#[derive(Default)]
struct MemoryTokenRepository {
    rows: StdMutex<HashMap<(String, String), TokenRecord>>,
}

impl MemoryTokenRepository {
    fn row_count(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn seed(&self, expires_in_secs: i64, refresh_token: Option<&str>) {
        let now = Utc::now();
        let record = TokenRecord {
            provider: "device-platform".to_string(),
            user_id: "user-1".to_string(),
            access_token: "at-stale".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            token_type: "Bearer".to_string(),
            expires_at: now + ChronoDuration::seconds(expires_in_secs),
            scope: None,
            created_at: now - ChronoDuration::hours(1),
            updated_at: now - ChronoDuration::hours(1),
        };
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((record.provider.clone(), record.user_id.clone()), record);
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn get(&self, provider: &str, user_id: &str) -> crate::Result<Option<TokenRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(provider.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: TokenRecord) -> crate::Result<TokenRecord> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (record.provider.clone(), record.user_id.clone()),
                record.clone(),
            );
        Ok(record)
    }

    async fn delete(&self, provider: &str, user_id: &str) -> crate::Result<u64> {
        let removed = self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(provider.to_string(), user_id.to_string()));
        Ok(u64::from(removed.is_some()))
    }
}

#[derive(Default)]
struct ScriptedTransport {
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    fail_exchange: bool,
    fail_refresh: bool,
    refresh_delay: Duration,
    last_code_verifier: StdMutex<Option<String>>,
    fail_revoke: bool,
}

#[async_trait]
impl OAuthTransport for ScriptedTransport {
    async fn exchange_code(
        &self,
        _settings: &ProviderSettings,
        _code: &str,
        code_verifier: Option<&str>,
    ) -> std::result::Result<TokenResponse, TransportError> {
        let call = self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_code_verifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = code_verifier.map(str::to_string);
        if self.fail_exchange {
            return Err(TransportError::new("invalid_grant"));
        }
        Ok(TokenResponse {
            access_token: format!("at-{}", call),
            refresh_token: Some("rt-initial".to_string()),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3_600),
            scope: Some("devices.read".to_string()),
        })
    }

    async fn refresh(
        &self,
        _settings: &ProviderSettings,
        _refresh_token: &str,
    ) -> std::result::Result<TokenResponse, TransportError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if self.fail_refresh {
            return Err(TransportError::new("invalid_grant: refresh token revoked"));
        }
        Ok(TokenResponse {
            access_token: format!("at-refreshed-{}", call),
            // No rotation: the provider omits the refresh token on refresh.
            refresh_token: None,
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3_600),
            scope: None,
        })
    }

    async fn revoke(
        &self,
        _settings: &ProviderSettings,
        _token: &str,
    ) -> std::result::Result<(), TransportError> {
        if self.fail_revoke {
            return Err(TransportError::new("revocation endpoint unavailable"));
        }
        Ok(())
    }
}

fn provider_settings() -> ProviderSettings {
    ProviderSettings {
        provider: "device-platform".to_string(),
        client_id: "client-1".to_string(),
        client_secret: None,
        authorize_url: "https://auth.example.com/authorize".to_string(),
        token_url: "https://auth.example.com/token".to_string(),
        revoke_url: Some("https://auth.example.com/revoke".to_string()),
        redirect_uri: "https://dashboard.example.com/callback".to_string(),
        scopes: vec!["devices.read".to_string(), "tasks.read".to_string()],
        use_pkce: true,
    }
}

fn build_service(
    transport: Arc<ScriptedTransport>,
) -> (Arc<TokenService>, Arc<MemoryTokenRepository>) {
    let repository = Arc::new(MemoryTokenRepository::default());
    let locks = Arc::new(AdvisoryLockService::new(Arc::new(MemoryLockBackend::new())));
    let service = Arc::new(TokenService::new(
        provider_settings(),
        Arc::clone(&repository) as Arc<dyn TokenRepository>,
        transport as Arc<dyn OAuthTransport>,
        locks,
    ));
    (service, repository)
}

#[tokio::test]
async fn authorization_url_carries_state_and_pkce_challenge() {
    let (service, _repo) = build_service(Arc::new(ScriptedTransport::default()));
    let request = service.get_authorization_url("user-1").await;

    assert!(request.url.starts_with("https://auth.example.com/authorize?"));
    assert!(request.url.contains(&format!("state={}", request.state)));
    assert!(request.url.contains("code_challenge="));
    assert!(request.url.contains("code_challenge_method=S256"));
    assert!(request.url.contains("scope=devices.read%20tasks.read"));
    assert_eq!(service.pending_state_count().await, 1);
}

#[tokio::test]
async fn exchange_consumes_the_state_entry() {
    let transport = Arc::new(ScriptedTransport::default());
    let (service, repo) = build_service(Arc::clone(&transport));

    let request = service.get_authorization_url("user-1").await;
    let record = service
        .exchange_code_for_token("code-1", &request.state)
        .await
        .expect("first exchange succeeds");
    assert_eq!(record.user_id, "user-1");
    assert_eq!(repo.row_count(), 1);

    // The PKCE verifier travelled with the exchange.
    let verifier = transport
        .last_code_verifier
        .lock()
        .unwrap()
        .clone()
        .expect("verifier forwarded");
    assert_eq!(verifier.len(), 43);

    // Replaying the same state must fail regardless of the code.
    let replay = service.exchange_code_for_token("code-1", &request.state).await;
    assert!(matches!(replay, Err(Error::Auth(AuthError::InvalidState))));
    assert_eq!(transport.exchange_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_exchange_still_consumes_the_state() {
    let transport = Arc::new(ScriptedTransport {
        fail_exchange: true,
        ..ScriptedTransport::default()
    });
    let (service, repo) = build_service(Arc::clone(&transport));

    let request = service.get_authorization_url("user-1").await;
    let first = service.exchange_code_for_token("code-1", &request.state).await;
    assert!(matches!(
        first,
        Err(Error::Auth(AuthError::TokenExchangeFailed(_)))
    ));
    assert_eq!(repo.row_count(), 0);

    let second = service.exchange_code_for_token("code-1", &request.state).await;
    assert!(matches!(second, Err(Error::Auth(AuthError::InvalidState))));
}

#[tokio::test]
async fn expired_state_is_rejected_before_the_network_call() {
    let transport = Arc::new(ScriptedTransport::default());
    let (service, _repo) = build_service(Arc::clone(&transport));

    let request = service.get_authorization_url("user-1").await;
    service
        .backdate_pending_state(&request.state, PENDING_STATE_TTL_SECS + 60)
        .await;

    let result = service.exchange_code_for_token("code-1", &request.state).await;
    assert!(matches!(result, Err(Error::Auth(AuthError::InvalidState))));
    assert_eq!(transport.exchange_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sweep_drops_only_expired_states() {
    let (service, _repo) = build_service(Arc::new(ScriptedTransport::default()));

    let old = service.get_authorization_url("user-1").await;
    let fresh = service.get_authorization_url("user-2").await;
    service
        .backdate_pending_state(&old.state, PENDING_STATE_TTL_SECS + 1)
        .await;

    service.sweep_pending_once().await;
    assert_eq!(service.pending_state_count().await, 1);

    let result = service.exchange_code_for_token("code-2", &fresh.state).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn missing_record_yields_none() {
    let (service, _repo) = build_service(Arc::new(ScriptedTransport::default()));
    let token = service.get_valid_token("user-1").await.expect("no error");
    assert!(token.is_none());
}

#[tokio::test]
async fn fresh_token_is_returned_without_a_refresh() {
    let transport = Arc::new(ScriptedTransport::default());
    let (service, repo) = build_service(Arc::clone(&transport));
    repo.seed(3_600, Some("rt-1"));

    let token = service
        .get_valid_token("user-1")
        .await
        .expect("no error")
        .expect("token present");
    assert_eq!(token.access_token, "at-stale");
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn token_inside_the_margin_is_refreshed_in_place() {
    let transport = Arc::new(ScriptedTransport::default());
    let (service, repo) = build_service(Arc::clone(&transport));
    // Expires in two minutes: legally valid, but inside the safety margin.
    repo.seed(120, Some("rt-1"));

    let token = service
        .get_valid_token("user-1")
        .await
        .expect("no error")
        .expect("token present");

    assert_eq!(token.access_token, "at-refreshed-0");
    assert!(token.expires_at > Utc::now() + ChronoDuration::minutes(30));
    // The provider omitted the refresh token; the stored one survives.
    assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
    // Updated in place, never duplicated.
    assert_eq!(repo.row_count(), 1);
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dead_refresh_token_deletes_the_record() {
    let transport = Arc::new(ScriptedTransport {
        fail_refresh: true,
        ..ScriptedTransport::default()
    });
    let (service, repo) = build_service(Arc::clone(&transport));
    repo.seed(60, Some("rt-dead"));

    let token = service.get_valid_token("user-1").await.expect("no error");
    assert!(token.is_none());
    assert_eq!(repo.row_count(), 0);

    // The next call sees no record and does not retry the dead token.
    let token = service.get_valid_token("user-1").await.expect("no error");
    assert!(token.is_none());
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_token_without_refresh_token_is_dropped() {
    let transport = Arc::new(ScriptedTransport::default());
    let (service, repo) = build_service(Arc::clone(&transport));
    repo.seed(-60, None);

    let token = service.get_valid_token("user-1").await.expect("no error");
    assert!(token.is_none());
    assert_eq!(repo.row_count(), 0);
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_refreshes_spend_a_single_grant() {
    let transport = Arc::new(ScriptedTransport {
        refresh_delay: Duration::from_millis(100),
        ..ScriptedTransport::default()
    });
    let (service, repo) = build_service(Arc::clone(&transport));
    repo.seed(60, Some("rt-1"));

    let first = service.get_valid_token("user-1");
    let second = service.get_valid_token("user-1");
    let (first, second) = tokio::join!(first, second);

    let first = first.expect("no error").expect("token present");
    let second = second.expect("no error").expect("token present");
    assert_eq!(first.access_token, second.access_token);
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn revoke_deletes_locally_even_when_the_remote_call_fails() {
    let transport = Arc::new(ScriptedTransport {
        fail_revoke: true,
        ..ScriptedTransport::default()
    });
    let (service, repo) = build_service(Arc::clone(&transport));
    repo.seed(3_600, Some("rt-1"));

    service.revoke_token("user-1").await.expect("revoke is best-effort");
    assert_eq!(repo.row_count(), 0);
}
