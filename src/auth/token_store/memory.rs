use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{RefreshTokenStore, RotateOutcome};
use crate::auth::refresh_token::RefreshTokenRecord;
use crate::error::{AppError, DatabaseError};

/// Mutex-guarded map; every trait call is one critical section
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, RefreshTokenRecord>>, AppError> {
        self.records
            .lock()
            .map_err(|_| AppError::Internal("refresh token store lock poisoned".to_string()))
    }
}

fn duplicate(token_id: &str) -> AppError {
    DatabaseError::UniqueConstraintViolation(format!("refresh token {} already exists", token_id))
        .into()
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn find(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self.lock()?.get(token_id).cloned())
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<RefreshTokenRecord>, AppError> {
        let records = self.lock()?;
        let mut found: Vec<RefreshTokenRecord> = records
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|record| record.created_at);
        Ok(found)
    }

    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        let mut records = self.lock()?;
        if records.contains_key(&record.token_id) {
            return Err(duplicate(&record.token_id));
        }
        records.insert(record.token_id.clone(), record.clone());
        Ok(())
    }

    async fn rotate(
        &self,
        current_token_id: &str,
        successor: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AppError> {
        let mut records = self.lock()?;

        if records.contains_key(&successor.token_id) {
            return Err(duplicate(&successor.token_id));
        }

        match records.get_mut(current_token_id) {
            Some(current) if current.revoked_at.is_none() => {
                current.revoked_at = Some(now);
                current.replaced_by_token_id = Some(successor.token_id.clone());
            }
            _ => return Ok(RotateOutcome::Stale),
        }

        records.insert(successor.token_id.clone(), successor.clone());
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, token_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut records = self.lock()?;
        match records.get_mut(token_id) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut records = self.lock()?;
        let mut revoked = 0;
        for record in records
            .values_mut()
            .filter(|record| record.user_id == user_id && record.revoked_at.is_none())
        {
            record.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn delete_expired_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| !(record.user_id == user_id && record.is_expired(now)));
        Ok((before - records.len()) as u64)
    }
}
