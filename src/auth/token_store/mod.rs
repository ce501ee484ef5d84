/// Refresh Token Store
///
/// Narrow persistence interface for refresh-token records. Everything the
/// rotation protocol decides is decided against this store.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::refresh_token::RefreshTokenRecord;
use crate::error::AppError;

pub use memory::InMemoryRefreshTokenStore;
pub use postgres::PgRefreshTokenStore;

/// Outcome of an atomic rotation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Predecessor revoked and linked, successor inserted
    Rotated,
    /// Predecessor was no longer live; nothing was written
    Stale,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn find(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, AppError>;

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<RefreshTokenRecord>, AppError>;

    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AppError>;

    /// All-or-nothing: revoke `current_token_id` (only if still unrevoked),
    /// link it to `successor`, and insert `successor`.
    async fn rotate(
        &self,
        current_token_id: &str,
        successor: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AppError>;

    /// Sets `revoked_at` if unset; returns whether a row changed
    async fn revoke(&self, token_id: &str, now: DateTime<Utc>) -> Result<bool, AppError>;

    /// Revokes every unrevoked record of the user; returns how many changed
    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>)
        -> Result<u64, AppError>;

    /// Deletes the user's records with `expires_at <= now`
    async fn delete_expired_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}
