/// Request and response shapes of the auth operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::User;

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
    /// Accepted for client compatibility; refresh lifetime is fixed
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Access, identity and refresh tokens issued together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub id_token: String,
}

/// Returned by login and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_confirmed: bool,
    pub phone_confirmed: bool,
    pub is_active: bool,
    pub roles: Vec<String>,
    /// Two-factor sign-in is not implemented; always false
    pub requires_two_factor: bool,
    pub tokens: TokenPair,
}

impl LoginResponse {
    pub fn new(user: &User, roles: Vec<String>, tokens: TokenPair) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            email_confirmed: user.email_confirmed,
            phone_confirmed: user.phone_confirmed,
            is_active: user.is_active,
            roles,
            requires_two_factor: false,
            tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutAllResponse {
    pub success: bool,
    pub revoked: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountStatusRequest {
    pub is_active: bool,
}

/// Result of an administrator activating or deactivating an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatusResponse {
    pub user_id: Uuid,
    pub is_active: bool,
    /// Refresh tokens revoked by a deactivation
    pub revoked: u64,
}

/// Profile of the authenticated user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub email_confirmed: bool,
    pub phone_confirmed: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ProfileResponse {
    pub fn new(user: &User, roles: Vec<String>) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            full_name: user.full_name(),
            email_confirmed: user.email_confirmed,
            phone_confirmed: user.phone_confirmed,
            roles,
            created_at: user.created_at,
        }
    }
}

/// Request provenance recorded on issued refresh tokens
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: Option<String>,
}

/// Result of a successful login or rotation
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub roles: Vec<String>,
    pub tokens: TokenPair,
}

impl From<Session> for LoginResponse {
    fn from(session: Session) -> Self {
        LoginResponse::new(&session.user, session.roles, session.tokens)
    }
}
