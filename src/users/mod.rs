/// User accounts and credential verification
///
/// The identity core only consumes this interface. Password hashing,
/// lockout bookkeeping and role membership live behind `UserStore`.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

pub use memory::InMemoryUserStore;
pub use postgres::PgUserStore;

/// A registered account as seen by the identity core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_confirmed: bool,
    pub phone_confirmed: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// "First Last", or whichever part is present
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Already-validated input for account creation
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Result of checking a password against an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Success,
    Failed,
    LockedOut,
    NotAllowed,
}

/// Credential and account collaborator of the auth orchestrator
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Hashes `password` and stores the account; duplicates surface as a
    /// unique-constraint database error
    async fn create_user(&self, new_user: NewUser, password: &str) -> Result<User, AppError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// Case-insensitive
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Case-insensitive
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Verifies the password and updates lockout state
    async fn check_password(
        &self,
        user: &User,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<PasswordCheck, AppError>;

    async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<(), AppError>;

    /// Role names, sorted
    async fn roles_for(&self, user_id: Uuid) -> Result<Vec<String>, AppError>;

    async fn role_exists(&self, role: &str) -> Result<bool, AppError>;

    /// Returns true when the role was newly created
    async fn ensure_role(&self, role: &str) -> Result<bool, AppError>;

    async fn add_to_role(&self, user_id: Uuid, role: &str) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: Option<&str>, last: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: None,
            phone: None,
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            email_confirmed: false,
            phone_confirmed: false,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(
            user(Some("Alice"), Some("Liddell")).full_name().as_deref(),
            Some("Alice Liddell")
        );
        assert_eq!(user(None, Some("Liddell")).full_name().as_deref(), Some("Liddell"));
        assert_eq!(user(None, None).full_name(), None);
    }
}
