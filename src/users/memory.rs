use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{NewUser, PasswordCheck, User, UserStore};
use crate::auth::{hash_password, verify_password_blocking};
use crate::configuration::SignInSettings;
use crate::error::{AppError, DatabaseError};

struct StoredUser {
    user: User,
    password_hash: String,
    failed_attempts: u32,
    lockout_end: Option<DateTime<Utc>>,
    roles: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, StoredUser>,
    // normalized role name -> display name
    roles: HashMap<String, String>,
}

/// Process-local user store for tests and `storage.backend = memory`
pub struct InMemoryUserStore {
    settings: SignInSettings,
    state: Mutex<State>,
}

fn normalize(value: &str) -> String {
    value.trim().to_uppercase()
}

impl InMemoryUserStore {
    pub fn new(settings: SignInSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("user store lock poisoned".to_string()))
    }

    /// Marks the email as confirmed
    pub fn confirm_email(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut state = self.lock()?;
        let stored = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;
        stored.user.email_confirmed = true;
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, new_user: NewUser, password: &str) -> Result<User, AppError> {
        let password_hash = hash_password(password, self.settings.password_hash_cost)?;

        let mut state = self.lock()?;
        let username_key = normalize(&new_user.username);
        let email_key = new_user.email.as_deref().map(normalize);

        let duplicate = state.users.values().any(|stored| {
            normalize(&stored.user.username) == username_key
                || (email_key.is_some() && stored.user.email.as_deref().map(normalize) == email_key)
        });
        if duplicate {
            return Err(DatabaseError::UniqueConstraintViolation(
                "Username or email already registered".to_string(),
            )
            .into());
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            phone: new_user.phone,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email_confirmed: false,
            phone_confirmed: false,
            is_active: true,
            created_at: Utc::now(),
        };

        state.users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                password_hash,
                failed_attempts: 0,
                lockout_end: None,
                roles: BTreeSet::new(),
            },
        );

        Ok(user)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let state = self.lock()?;
        Ok(state.users.get(&user_id).map(|stored| stored.user.clone()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let key = normalize(username);
        let state = self.lock()?;
        Ok(state
            .users
            .values()
            .find(|stored| normalize(&stored.user.username) == key)
            .map(|stored| stored.user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let key = normalize(email);
        let state = self.lock()?;
        Ok(state
            .users
            .values()
            .find(|stored| stored.user.email.as_deref().map(normalize).as_deref() == Some(key.as_str()))
            .map(|stored| stored.user.clone()))
    }

    async fn check_password(
        &self,
        user: &User,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<PasswordCheck, AppError> {
        let password_hash = {
            let state = self.lock()?;
            let stored = state
                .users
                .get(&user.id)
                .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;

            if stored.lockout_end.map_or(false, |end| end > now) {
                return Ok(PasswordCheck::LockedOut);
            }
            stored.password_hash.clone()
        };

        // The hash is checked without holding the store lock
        let verified = verify_password_blocking(password, &password_hash).await?;

        let mut state = self.lock()?;
        let stored = state
            .users
            .get_mut(&user.id)
            .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;

        if !verified {
            stored.failed_attempts += 1;
            if stored.failed_attempts >= self.settings.max_failed_attempts {
                stored.failed_attempts = 0;
                stored.lockout_end = Some(now + Duration::seconds(self.settings.lockout_seconds));
                return Ok(PasswordCheck::LockedOut);
            }
            return Ok(PasswordCheck::Failed);
        }

        stored.failed_attempts = 0;
        stored.lockout_end = None;

        if self.settings.require_confirmed_email && !stored.user.email_confirmed {
            return Ok(PasswordCheck::NotAllowed);
        }

        Ok(PasswordCheck::Success)
    }

    async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<(), AppError> {
        let mut state = self.lock()?;
        let stored = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;
        stored.user.is_active = is_active;
        Ok(())
    }

    async fn roles_for(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        let state = self.lock()?;
        Ok(state
            .users
            .get(&user_id)
            .map(|stored| stored.roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn role_exists(&self, role: &str) -> Result<bool, AppError> {
        let state = self.lock()?;
        Ok(state.roles.contains_key(&normalize(role)))
    }

    async fn ensure_role(&self, role: &str) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let key = normalize(role);
        if state.roles.contains_key(&key) {
            return Ok(false);
        }
        state.roles.insert(key, role.trim().to_string());
        Ok(true)
    }

    async fn add_to_role(&self, user_id: Uuid, role: &str) -> Result<(), AppError> {
        let mut state = self.lock()?;
        let role_name = state
            .roles
            .get(&normalize(role))
            .cloned()
            .ok_or_else(|| DatabaseError::NotFound(format!("Role {} not found", role)))?;
        let stored = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;
        stored.roles.insert(role_name);
        Ok(())
    }
}
