/// JWT Claims structure
///
/// A `ClaimSet` is built once per issuance from the user record and role
/// set. Each claim type maps to the tokens it is allowed to appear in, and
/// `Claims` is the serialized payload for one such destination (RFC 7519).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::users::User;

/// Token a claim may be written into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    AccessToken,
    IdentityToken,
}

const BOTH: &[Destination] = &[Destination::AccessToken, Destination::IdentityToken];
const ACCESS_ONLY: &[Destination] = &[Destination::AccessToken];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimType {
    Subject,
    TokenId,
    Name,
    GivenName,
    FamilyName,
    Email,
    PhoneNumber,
    Role,
}

impl ClaimType {
    pub fn destinations(self) -> &'static [Destination] {
        match self {
            ClaimType::Subject
            | ClaimType::Name
            | ClaimType::GivenName
            | ClaimType::FamilyName
            | ClaimType::PhoneNumber
            | ClaimType::Role => BOTH,
            ClaimType::TokenId | ClaimType::Email => ACCESS_ONLY,
        }
    }

    pub fn allows(self, destination: Destination) -> bool {
        self.destinations().contains(&destination)
    }
}

/// Claims about one user at one instant, before destination filtering
#[derive(Debug, Clone)]
pub struct ClaimSet {
    pub issued_at: DateTime<Utc>,
    entries: Vec<(ClaimType, String)>,
}

impl ClaimSet {
    /// Optional profile fields are only emitted when present and non-empty;
    /// every role becomes its own `Role` entry.
    pub fn for_user(user: &User, roles: &[String], issued_at: DateTime<Utc>) -> Self {
        let mut entries = vec![
            (ClaimType::Subject, user.id.to_string()),
            (ClaimType::TokenId, Uuid::new_v4().to_string()),
            (ClaimType::Name, user.username.clone()),
        ];

        let optional = [
            (ClaimType::GivenName, user.first_name.as_ref()),
            (ClaimType::FamilyName, user.last_name.as_ref()),
            (ClaimType::Email, user.email.as_ref()),
            (ClaimType::PhoneNumber, user.phone.as_ref()),
        ];
        for (claim, value) in optional {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                entries.push((claim, value.clone()));
            }
        }

        entries.extend(roles.iter().map(|role| (ClaimType::Role, role.clone())));

        Self { issued_at, entries }
    }

    pub fn values(&self, claim: ClaimType) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(c, _)| *c == claim)
            .map(|(_, value)| value.as_str())
    }

    fn first(&self, claim: ClaimType, destination: Destination) -> Option<String> {
        if !claim.allows(destination) {
            return None;
        }
        self.values(claim).next().map(str::to_string)
    }
}

/// JWT payload for access and identity tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Unique per access token; identity tokens carry none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role: Vec<String>,
}

impl Claims {
    /// Payload for `destination`, containing only the claims routed there
    pub fn build(
        set: &ClaimSet,
        destination: Destination,
        expires_at: DateTime<Utc>,
        issuer: &str,
        audience: Option<&str>,
    ) -> Self {
        let role = if ClaimType::Role.allows(destination) {
            set.values(ClaimType::Role).map(str::to_string).collect()
        } else {
            Vec::new()
        };

        Self {
            sub: set.first(ClaimType::Subject, destination).unwrap_or_default(),
            jti: set.first(ClaimType::TokenId, destination),
            iat: set.issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: issuer.to_string(),
            aud: audience.map(str::to_string),
            name: set.first(ClaimType::Name, destination),
            given_name: set.first(ClaimType::GivenName, destination),
            family_name: set.first(ClaimType::FamilyName, destination),
            email: set.first(ClaimType::Email, destination),
            phone_number: set.first(ClaimType::PhoneNumber, destination),
            role,
        }
    }

    /// Extract user ID from claims
    ///
    /// # Errors
    /// Returns `TokenInvalid` if the subject is not a UUID
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::TokenInvalid.into())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }
}
