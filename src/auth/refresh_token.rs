/// Refresh Token Primitives
///
/// Refresh tokens are presented as `<token_id>.<secret>`:
/// - `token_id` is a random UUID in simple (32 hex chars) form, used for lookup
/// - `secret` is 32 bytes from the OS RNG, base64url without padding
/// - only the SHA-256 of the secret is stored; it is compared in constant time

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AuthError;

pub const TOKEN_DELIMITER: char = '.';

const SECRET_BYTES: usize = 32;
// token_id (32) + delimiter + secret (43); anything much longer is garbage
const MAX_PRESENTED_LENGTH: usize = 256;

/// A persisted refresh token. The plaintext secret is never part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub token_id: String,
    pub user_id: Uuid,
    pub secret_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_id: Option<String>,
    pub ip_address: Option<String>,
}

impl RefreshTokenRecord {
    /// Expired at the exact instant of `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    /// Consumed by a rotation less than `grace` before `now`. A rotation
    /// stamped after `now` belongs to a request that raced this one.
    pub fn rotated_within(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match (self.revoked_at, &self.replaced_by_token_id) {
            (Some(revoked_at), Some(_)) => now - revoked_at < grace,
            _ => false,
        }
    }
}

/// Freshly minted token: the record to persist plus the string for the client
pub struct IssuedRefreshToken {
    pub record: RefreshTokenRecord,
    pub token: String,
}

impl IssuedRefreshToken {
    pub fn generate(
        user_id: Uuid,
        now: DateTime<Utc>,
        lifetime: Duration,
        ip_address: Option<String>,
    ) -> Self {
        let token_id = generate_token_id();
        let secret = generate_secret();

        let record = RefreshTokenRecord {
            token_id: token_id.clone(),
            user_id,
            secret_hash: hash_secret(&secret),
            created_at: now,
            expires_at: now + lifetime,
            revoked_at: None,
            replaced_by_token_id: None,
            ip_address,
        };

        Self {
            record,
            token: format!("{}{}{}", token_id, TOKEN_DELIMITER, secret),
        }
    }
}

/// A refresh token as presented by a client, split but not yet verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedRefreshToken {
    pub token_id: String,
    secret: String,
}

impl PresentedRefreshToken {
    /// Split `<token_id>.<secret>`; any structural problem is `TokenInvalid`
    pub fn parse(presented: &str) -> Result<Self, AuthError> {
        let presented = presented.trim();
        if presented.is_empty() || presented.len() > MAX_PRESENTED_LENGTH {
            return Err(AuthError::TokenInvalid);
        }

        let (token_id, secret) = presented
            .split_once(TOKEN_DELIMITER)
            .ok_or(AuthError::TokenInvalid)?;

        if token_id.is_empty() || !token_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AuthError::TokenInvalid);
        }

        match URL_SAFE_NO_PAD.decode(secret) {
            Ok(bytes) if bytes.len() == SECRET_BYTES => {}
            _ => return Err(AuthError::TokenInvalid),
        }

        Ok(Self {
            token_id: token_id.to_string(),
            secret: secret.to_string(),
        })
    }

    /// Constant-time comparison of this secret's hash against the stored one
    pub fn matches(&self, record: &RefreshTokenRecord) -> bool {
        constant_time_eq(
            hash_secret(&self.secret).as_bytes(),
            record.secret_hash.as_bytes(),
        )
    }
}

fn generate_token_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 of the secret as lowercase hex
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> IssuedRefreshToken {
        IssuedRefreshToken::generate(Uuid::new_v4(), Utc::now(), Duration::days(7), None)
    }

    #[test]
    fn test_wire_format() {
        let issued = issue();
        let (token_id, secret) = issued.token.split_once('.').unwrap();

        assert_eq!(token_id, issued.record.token_id);
        assert_eq!(token_id.len(), 32);
        assert!(!secret.contains('.'));
        assert_eq!(URL_SAFE_NO_PAD.decode(secret).unwrap().len(), 32);
    }

    #[test]
    fn test_secret_is_not_stored() {
        let issued = issue();
        let (_, secret) = issued.token.split_once('.').unwrap();

        assert_ne!(issued.record.secret_hash, secret);
        assert_eq!(issued.record.secret_hash.len(), 64);
        assert!(!issued.record.secret_hash.contains(secret));
    }

    #[test]
    fn test_parse_and_match() {
        let issued = issue();
        let presented = PresentedRefreshToken::parse(&issued.token).unwrap();

        assert_eq!(presented.token_id, issued.record.token_id);
        assert!(presented.matches(&issued.record));
    }

    #[test]
    fn test_stored_hash_cannot_be_presented_as_secret() {
        let issued = issue();
        let forged = format!("{}.{}", issued.record.token_id, issued.record.secret_hash);

        // A hex digest is not a 32-byte base64url secret, and even if it
        // parsed its hash would differ
        match PresentedRefreshToken::parse(&forged) {
            Err(AuthError::TokenInvalid) => {}
            Ok(presented) => assert!(!presented.matches(&issued.record)),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_wrong_secret_does_not_match() {
        let issued = issue();
        let other = issue();
        let (_, other_secret) = other.token.split_once('.').unwrap();
        let mixed = format!("{}.{}", issued.record.token_id, other_secret);

        let presented = PresentedRefreshToken::parse(&mixed).unwrap();
        assert!(!presented.matches(&issued.record));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let issued = issue();
        let (token_id, secret) = issued.token.split_once('.').unwrap();

        let cases = vec![
            String::new(),
            "no-delimiter".to_string(),
            format!(".{}", secret),
            format!("{}.", token_id),
            format!("{}.{}.extra", token_id, secret),
            format!("not-hex.{}", secret),
            format!("{}.{}", token_id, "short"),
            "a".repeat(300),
        ];

        for case in cases {
            assert_eq!(
                PresentedRefreshToken::parse(&case),
                Err(AuthError::TokenInvalid),
                "should reject {:?}",
                case
            );
        }
    }

    #[test]
    fn test_fresh_identifiers() {
        let a = issue();
        let b = issue();

        assert_ne!(a.record.token_id, b.record.token_id);
        assert_ne!(a.token, b.token);
        assert_ne!(a.record.secret_hash, b.record.secret_hash);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let issued = IssuedRefreshToken::generate(Uuid::new_v4(), now, Duration::seconds(10), None);

        assert!(!issued.record.is_expired(now + Duration::seconds(9)));
        assert!(issued.record.is_expired(now + Duration::seconds(10)));
        assert!(issued.record.is_live(now));
    }

    #[test]
    fn test_rotated_within_grace() {
        let now = Utc::now();
        let mut record = issue().record;
        let grace = Duration::seconds(5);
        assert!(!record.rotated_within(now, grace));

        // Plain revocation (logout, chain revoke) never counts
        record.revoked_at = Some(now);
        assert!(!record.rotated_within(now, grace));

        record.replaced_by_token_id = Some("successor".to_string());
        assert!(record.rotated_within(now, grace));
        assert!(record.rotated_within(now - Duration::seconds(1), grace));
        assert!(record.rotated_within(now + Duration::seconds(4), grace));
        assert!(!record.rotated_within(now + Duration::seconds(5), grace));
        assert!(!record.rotated_within(now, Duration::zero()));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
