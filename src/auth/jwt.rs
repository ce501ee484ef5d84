/// JWT Token Generation and Validation
///
/// `TokenSigner` owns the symmetric key and lifetimes. It is built once from
/// configuration and shared; an empty key is rejected at construction.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::{ClaimSet, Claims, Destination};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// A signed JWT and its absolute expiry
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: Option<String>,
    access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
    rotation_grace: Duration,
}

impl TokenSigner {
    /// # Errors
    /// Returns a config error if the secret is empty or a lifetime is out of range
    pub fn new(config: &JwtSettings) -> Result<Self, AppError> {
        config.validate()?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_lifetime: Duration::seconds(config.access_token_expiry),
            refresh_token_lifetime: Duration::seconds(config.refresh_token_expiry),
            rotation_grace: Duration::seconds(config.rotation_grace_seconds),
        })
    }

    pub fn refresh_token_lifetime(&self) -> Duration {
        self.refresh_token_lifetime
    }

    /// How long a just-rotated refresh token is treated as a racing
    /// duplicate rather than a replay
    pub fn rotation_grace(&self) -> Duration {
        self.rotation_grace
    }

    /// Sign the claims routed to `destination`; expiry counts from the
    /// set's issued-at
    pub fn sign(&self, set: &ClaimSet, destination: Destination) -> Result<SignedToken, AppError> {
        let expires_at = set.issued_at + self.access_token_lifetime;
        let claims = Claims::build(
            set,
            destination,
            expires_at,
            &self.issuer,
            self.audience.as_deref(),
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(SignedToken { token, expires_at })
    }

    pub fn sign_access_token(&self, set: &ClaimSet) -> Result<SignedToken, AppError> {
        self.sign(set, Destination::AccessToken)
    }

    pub fn sign_identity_token(&self, set: &ClaimSet) -> Result<SignedToken, AppError> {
        self.sign(set, Destination::IdentityToken)
    }

    /// Validate and extract claims from an access token
    ///
    /// # Errors
    /// `TokenInvalid` if the token is malformed, expired, tampered with,
    /// issued by someone else, or is an identity token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::warn!("JWT validation error: {}", e);
                AppError::from(AuthError::TokenInvalid)
            })?;

        // Identity tokens share the key but never carry a jti
        if claims.jti.is_none() {
            tracing::warn!(user_id = %claims.sub, "Identity token presented as access token");
            return Err(AuthError::TokenInvalid.into());
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::User;
    use uuid::Uuid;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            issuer: "test".to_string(),
            audience: None,
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            rotation_grace_seconds: 5,
        }
    }

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            phone: None,
            first_name: None,
            last_name: None,
            email_confirmed: true,
            phone_confirmed: false,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn claim_set(user: &User) -> ClaimSet {
        ClaimSet::for_user(user, &["User".to_string()], Utc::now())
    }

    #[test]
    fn test_generate_and_validate_token() {
        let signer = TokenSigner::new(&get_test_config()).unwrap();
        let user = test_user();
        let set = claim_set(&user);

        let signed = signer.sign_access_token(&set).expect("Failed to generate token");
        let claims = signer
            .validate_access_token(&signed.token)
            .expect("Failed to validate token");

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.role, vec!["User".to_string()]);
        assert_eq!(signed.expires_at, set.issued_at + Duration::seconds(3600));
        assert_eq!(claims.exp, signed.expires_at.timestamp());
    }

    #[test]
    fn test_empty_secret_fails_fast() {
        let mut config = get_test_config();
        config.secret = "   ".to_string();

        assert!(matches!(TokenSigner::new(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_invalid_token() {
        let signer = TokenSigner::new(&get_test_config()).unwrap();
        let result = signer.validate_access_token("invalid.token.here");

        assert_eq!(
            result.unwrap_err().auth_error(),
            Some(&AuthError::TokenInvalid)
        );
    }

    #[test]
    fn test_tampered_token() {
        let signer = TokenSigner::new(&get_test_config()).unwrap();
        let signed = signer.sign_access_token(&claim_set(&test_user())).unwrap();

        let tampered = format!("{}X", signed.token);
        assert!(signer.validate_access_token(&tampered).is_err());
    }

    #[test]
    fn test_wrong_issuer() {
        let signer = TokenSigner::new(&get_test_config()).unwrap();
        let signed = signer.sign_access_token(&claim_set(&test_user())).unwrap();

        let mut config = get_test_config();
        config.issuer = "wrong-issuer".to_string();
        let other = TokenSigner::new(&config).unwrap();

        assert!(other.validate_access_token(&signed.token).is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let signer = TokenSigner::new(&get_test_config()).unwrap();
        let signed = signer.sign_access_token(&claim_set(&test_user())).unwrap();

        let mut config = get_test_config();
        config.secret = "another-secret-key-at-least-32-characters".to_string();
        let other = TokenSigner::new(&config).unwrap();

        assert!(other.validate_access_token(&signed.token).is_err());
    }

    #[test]
    fn test_audience_is_enforced_when_configured() {
        let mut config = get_test_config();
        config.audience = Some("mobile".to_string());
        let signer = TokenSigner::new(&config).unwrap();
        let signed = signer.sign_access_token(&claim_set(&test_user())).unwrap();
        assert!(signer.validate_access_token(&signed.token).is_ok());

        config.audience = Some("web".to_string());
        let other = TokenSigner::new(&config).unwrap();
        assert!(other.validate_access_token(&signed.token).is_err());
    }

    #[test]
    fn test_identity_token_is_not_an_access_token() {
        let signer = TokenSigner::new(&get_test_config()).unwrap();
        let signed = signer.sign_identity_token(&claim_set(&test_user())).unwrap();

        assert!(signer.validate_access_token(&signed.token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = TokenSigner::new(&get_test_config()).unwrap();
        let user = test_user();
        // Well past the default 60s leeway
        let set = ClaimSet::for_user(&user, &[], Utc::now() - Duration::hours(2));
        let signed = signer.sign_access_token(&set).unwrap();

        assert!(signer.validate_access_token(&signed.token).is_err());
    }
}
