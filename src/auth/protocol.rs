/// Refresh Token Protocol
///
/// Issue, validate-and-rotate, revoke and prune refresh tokens. Presenting a
/// token that was already consumed, or whose secret does not match, revokes
/// every live token of the owning user. The one exception is a token
/// consumed by a rotation inside the configured grace window: that request
/// lost a race and gets `TokenStale`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::claims::ClaimSet;
use crate::auth::jwt::TokenSigner;
use crate::auth::refresh_token::{IssuedRefreshToken, PresentedRefreshToken, RefreshTokenRecord};
use crate::auth::token_store::{RefreshTokenStore, RotateOutcome};
use crate::auth::types::{Session, TokenPair};
use crate::error::{AppError, AuthError};
use crate::users::{User, UserStore};

pub struct RefreshTokenService {
    store: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn UserStore>,
    signer: Arc<TokenSigner>,
}

impl RefreshTokenService {
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserStore>,
        signer: Arc<TokenSigner>,
    ) -> Self {
        Self {
            store,
            users,
            signer,
        }
    }

    /// Sign access and identity tokens and persist a fresh refresh token.
    ///
    /// With `replaces`, the predecessor is revoked and linked in the same
    /// store operation; if it was consumed concurrently the result is
    /// `TokenStale` and nothing is written.
    pub async fn issue_at(
        &self,
        user: &User,
        roles: &[String],
        replaces: Option<&RefreshTokenRecord>,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, AppError> {
        let claims = ClaimSet::for_user(user, roles, now);
        let access = self.signer.sign_access_token(&claims)?;
        let identity = self.signer.sign_identity_token(&claims)?;

        let issued = IssuedRefreshToken::generate(
            user.id,
            now,
            self.signer.refresh_token_lifetime(),
            ip_address,
        );

        match replaces {
            None => self.store.insert(&issued.record).await?,
            Some(current) => {
                let outcome = self
                    .store
                    .rotate(&current.token_id, &issued.record, now)
                    .await?;
                if outcome == RotateOutcome::Stale {
                    tracing::info!(
                        user_id = %user.id,
                        token_id = %current.token_id,
                        "Refresh token consumed by a concurrent request"
                    );
                    return Err(AuthError::TokenStale.into());
                }
            }
        }

        tracing::info!(
            user_id = %user.id,
            token_id = %issued.record.token_id,
            replaces = ?replaces.map(|r| r.token_id.as_str()),
            "Refresh token issued"
        );

        Ok(TokenPair {
            access_token: access.token,
            access_token_expires_at: access.expires_at,
            refresh_token: issued.token,
            refresh_token_expires_at: issued.record.expires_at,
            id_token: identity.token,
        })
    }

    pub async fn issue(
        &self,
        user: &User,
        roles: &[String],
        ip_address: Option<String>,
    ) -> Result<TokenPair, AppError> {
        self.issue_at(user, roles, None, ip_address, Utc::now()).await
    }

    pub async fn validate_and_rotate(
        &self,
        presented: &str,
        ip_address: Option<String>,
    ) -> Result<Session, AppError> {
        self.validate_and_rotate_at(presented, ip_address, Utc::now())
            .await
    }

    /// Consume a presented refresh token and issue its successor
    pub async fn validate_and_rotate_at(
        &self,
        presented: &str,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        let presented = PresentedRefreshToken::parse(presented)?;

        // Unknown ids get the same answer as malformed input
        let record = self
            .store
            .find(&presented.token_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if record.is_expired(now) {
            self.store.revoke(&record.token_id, now).await?;
            tracing::info!(
                user_id = %record.user_id,
                token_id = %record.token_id,
                "Expired refresh token presented"
            );
            return Err(AuthError::TokenExpired.into());
        }

        if !presented.matches(&record) {
            self.revoke_chain(&record, now, "secret mismatch").await?;
            return Err(AuthError::TokenReuse.into());
        }

        if record.is_revoked() {
            // A retry or double-submit racing the rotation that consumed it
            if record.rotated_within(now, self.signer.rotation_grace()) {
                tracing::info!(
                    user_id = %record.user_id,
                    token_id = %record.token_id,
                    "Refresh token presented again during rotation grace"
                );
                return Err(AuthError::TokenStale.into());
            }
            self.revoke_chain(&record, now, "already consumed").await?;
            return Err(AuthError::TokenReuse.into());
        }

        let user = match self.users.find_by_id(record.user_id).await? {
            Some(user) if user.is_active => user,
            _ => {
                self.revoke_chain(&record, now, "owner missing or inactive")
                    .await?;
                return Err(AuthError::AccountInactive.into());
            }
        };

        let roles = self.users.roles_for(user.id).await?;
        let tokens = self
            .issue_at(&user, &roles, Some(&record), ip_address, now)
            .await?;

        Ok(Session {
            user,
            roles,
            tokens,
        })
    }

    pub async fn revoke(&self, presented: &str) -> Result<bool, AppError> {
        self.revoke_at(presented, Utc::now()).await
    }

    /// Revoke one token, no cascade. Returns false when there was nothing
    /// to revoke: unknown id, already revoked, or a secret that does not
    /// match.
    pub async fn revoke_at(&self, presented: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let presented = PresentedRefreshToken::parse(presented)?;

        let record = match self.store.find(&presented.token_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        if !presented.matches(&record) {
            tracing::warn!(
                user_id = %record.user_id,
                token_id = %record.token_id,
                "Revocation with mismatched secret ignored"
            );
            return Ok(false);
        }

        let revoked = self.store.revoke(&record.token_id, now).await?;
        if revoked {
            tracing::info!(
                user_id = %record.user_id,
                token_id = %record.token_id,
                "Refresh token revoked"
            );
        }
        Ok(revoked)
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let revoked = self.store.revoke_all_for_user(user_id, Utc::now()).await?;
        tracing::info!(user_id = %user_id, revoked = revoked, "All refresh tokens revoked");
        Ok(revoked)
    }

    pub async fn prune_expired(&self, user_id: Uuid) -> Result<u64, AppError> {
        self.prune_expired_at(user_id, Utc::now()).await
    }

    pub async fn prune_expired_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let pruned = self.store.delete_expired_for_user(user_id, now).await?;
        if pruned > 0 {
            tracing::debug!(user_id = %user_id, pruned = pruned, "Expired refresh tokens pruned");
        }
        Ok(pruned)
    }

    async fn revoke_chain(
        &self,
        record: &RefreshTokenRecord,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), AppError> {
        let revoked = self.store.revoke_all_for_user(record.user_id, now).await?;
        tracing::warn!(
            user_id = %record.user_id,
            token_id = %record.token_id,
            reason = reason,
            revoked = revoked,
            "Refresh token reuse detected, revoked token chain"
        );
        Ok(())
    }
}
