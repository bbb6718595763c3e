//! OAuth token repository over the `oauth_tokens` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use fleetmon_core::auth::{TokenRecord, TokenRepository};
use fleetmon_core::Result;

use crate::errors::StorageError;

#[derive(sqlx::FromRow)]
struct TokenRow {
    provider: String,
    user_id: String,
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_at: DateTime<Utc>,
    scope: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        TokenRecord {
            provider: row.provider,
            user_id: row.user_id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            token_type: row.token_type,
            expires_at: row.expires_at,
            scope: row.scope,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Postgres-backed token repository, one row per (provider, user).
#[derive(Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn get(&self, provider: &str, user_id: &str) -> Result<Option<TokenRecord>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT provider, user_id, access_token, refresh_token, token_type,
                    expires_at, scope, created_at, updated_at
            FROM oauth_tokens
            WHERE provider = $1 AND user_id = $2",
        )
        .bind(provider)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.map(TokenRecord::from))
    }

    async fn upsert(&self, record: TokenRecord) -> Result<TokenRecord> {
        // A rotation response without a refresh token must not erase the one
        // on file, hence the COALESCE. created_at survives updates.
        let row = sqlx::query_as::<_, TokenRow>(
            "INSERT INTO oauth_tokens (
                provider, user_id, access_token, refresh_token, token_type,
                expires_at, scope, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (provider, user_id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, oauth_tokens.refresh_token),
                token_type = EXCLUDED.token_type,
                expires_at = EXCLUDED.expires_at,
                scope = COALESCE(EXCLUDED.scope, oauth_tokens.scope),
                updated_at = EXCLUDED.updated_at
            RETURNING provider, user_id, access_token, refresh_token, token_type,
                      expires_at, scope, created_at, updated_at",
        )
        .bind(&record.provider)
        .bind(&record.user_id)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(&record.token_type)
        .bind(record.expires_at)
        .bind(&record.scope)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.into())
    }

    async fn delete(&self, provider: &str, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oauth_tokens WHERE provider = $1 AND user_id = $2")
            .bind(provider)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }
}
