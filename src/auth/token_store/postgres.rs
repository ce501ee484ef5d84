use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RefreshTokenStore, RotateOutcome};
use crate::auth::refresh_token::RefreshTokenRecord;
use crate::error::AppError;

/// Namespace column of the `(login_provider, token_id)` key
pub const LOGIN_PROVIDER: &str = "authkeep";

const RECORD_COLUMNS: &str = "token_id, user_id, secret_hash, created_at, expires_at, \
     revoked_at, replaced_by_token_id, ip_address";

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    token_id: String,
    user_id: Uuid,
    secret_hash: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    replaced_by_token_id: Option<String>,
    ip_address: Option<String>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            token_id: row.token_id,
            user_id: row.user_id,
            secret_hash: row.secret_hash,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            replaced_by_token_id: row.replaced_by_token_id,
            ip_address: row.ip_address,
        }
    }
}

/// `refresh_tokens` table
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_RECORD: &str = r#"
    INSERT INTO refresh_tokens
        (login_provider, token_id, user_id, secret_hash, created_at, expires_at,
         revoked_at, replaced_by_token_id, ip_address)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

fn bind_insert<'q>(
    record: &'q RefreshTokenRecord,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(INSERT_RECORD)
        .bind(LOGIN_PROVIDER)
        .bind(&record.token_id)
        .bind(record.user_id)
        .bind(&record.secret_hash)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .bind(&record.replaced_by_token_id)
        .bind(&record.ip_address)
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn find(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM refresh_tokens WHERE login_provider = $1 AND token_id = $2",
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&query)
            .bind(LOGIN_PROVIDER)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<RefreshTokenRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM refresh_tokens WHERE login_provider = $1 AND user_id = $2 \
             ORDER BY created_at",
            RECORD_COLUMNS
        );
        let rows = sqlx::query_as::<_, RefreshTokenRow>(&query)
            .bind(LOGIN_PROVIDER)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        bind_insert(record).execute(&self.pool).await?;
        Ok(())
    }

    async fn rotate(
        &self,
        current_token_id: &str,
        successor: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AppError> {
        // Dropping the transaction without commit rolls it back, so a
        // cancelled request leaves neither half behind
        let mut transaction = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1, replaced_by_token_id = $2
            WHERE login_provider = $3 AND token_id = $4 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(&successor.token_id)
        .bind(LOGIN_PROVIDER)
        .bind(current_token_id)
        .execute(&mut transaction)
        .await?;

        if updated.rows_affected() == 0 {
            transaction.rollback().await?;
            return Ok(RotateOutcome::Stale);
        }

        bind_insert(successor).execute(&mut transaction).await?;
        transaction.commit().await?;

        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, token_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE login_provider = $2 AND token_id = $3 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(LOGIN_PROVIDER)
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE login_provider = $2 AND user_id = $3 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(LOGIN_PROVIDER)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE login_provider = $1 AND user_id = $2 AND expires_at <= $3
            "#,
        )
        .bind(LOGIN_PROVIDER)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
