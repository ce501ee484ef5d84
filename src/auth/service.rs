/// Auth orchestrator
///
/// Sign-up, login, refresh and logout on top of the user store and the
/// refresh token protocol. Every operation returns a typed `Result` whose
/// error classifies into an `OperationStatus`.

use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::TokenSigner;
use crate::auth::password::validate_password_strength;
use crate::auth::protocol::RefreshTokenService;
use crate::auth::token_store::RefreshTokenStore;
use crate::auth::types::{
    AccountStatusRequest, AccountStatusResponse, ClientContext, LoginRequest, LoginResponse, LogoutAllResponse, LogoutResponse, ProfileResponse,
    RefreshRequest, SignUpRequest, SignUpResponse,
};
use crate::configuration::SignInSettings;
use crate::error::{AppError, AuthError, DatabaseError, ErrorContext};
use crate::users::{NewUser, PasswordCheck, User, UserStore};
use crate::validators::{
    is_valid_email, is_valid_login_identifier, is_valid_name, is_valid_phone, is_valid_username,
    optional,
};

pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: RefreshTokenService,
    settings: SignInSettings,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        token_store: Arc<dyn RefreshTokenStore>,
        signer: Arc<TokenSigner>,
        settings: SignInSettings,
    ) -> Self {
        let tokens = RefreshTokenService::new(token_store, users.clone(), signer);
        Self {
            users,
            tokens,
            settings,
        }
    }

    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, AppError> {
        let ctx = ErrorContext::new("sign_up");

        let new_user = NewUser {
            username: is_valid_username(&request.username)?,
            email: optional(request.email.as_deref(), is_valid_email)?,
            phone: optional(request.phone.as_deref(), is_valid_phone)?,
            first_name: optional(request.first_name.as_deref(), |v| {
                is_valid_name("first_name", v)
            })?,
            last_name: optional(request.last_name.as_deref(), |v| {
                is_valid_name("last_name", v)
            })?,
        };
        validate_password_strength(&request.password)?;

        let user = self.users.create_user(new_user, &request.password).await?;
        tracing::info!(
            request_id = %ctx.request_id,
            user_id = %user.id,
            username = %user.username,
            "User registered"
        );

        self.assign_default_role(&ctx, &user).await;
        let roles = self.users.roles_for(user.id).await?;

        Ok(SignUpResponse {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            full_name: user.full_name(),
            roles,
        })
    }

    /// A missing or failing default role never fails the sign-up
    async fn assign_default_role(&self, ctx: &ErrorContext, user: &User) {
        let role = self.settings.default_role.as_str();

        let result = match self.users.role_exists(role).await {
            Ok(true) => self.users.add_to_role(user.id, role).await,
            Ok(false) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    user_id = %user.id,
                    role = role,
                    "Default role does not exist, skipping assignment"
                );
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            ctx.clone().with_user_id(user.id.to_string()).log_error(&e);
        }
    }

    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientContext,
    ) -> Result<LoginResponse, AppError> {
        let ctx = ErrorContext::new("login");
        let identifier = is_valid_login_identifier(&request.username_or_email)?;
        if request.password.is_empty() {
            return Err(AuthError::InvalidCredentials.into());
        }

        let user = match self.users.find_by_username(&identifier).await? {
            Some(user) => Some(user),
            None => self.users.find_by_email(&identifier).await?,
        };
        // NOTE: NotFound here reveals which accounts exist (user enumeration)
        let user = user.ok_or(AuthError::UserNotFound)?;
        // Usernames cannot contain '@', so an email identifier never resolves
        // to someone else's username

        if !user.is_active {
            tracing::warn!(request_id = %ctx.request_id, user_id = %user.id, "Login to inactive account");
            return Err(AuthError::AccountInactive.into());
        }

        match self
            .users
            .check_password(&user, &request.password, chrono::Utc::now())
            .await?
        {
            PasswordCheck::Success => {}
            PasswordCheck::LockedOut => {
                tracing::warn!(request_id = %ctx.request_id, user_id = %user.id, "Account locked out");
                return Err(AuthError::AccountLockedOut.into());
            }
            PasswordCheck::NotAllowed => {
                return Err(AuthError::SignInNotAllowed.into());
            }
            PasswordCheck::Failed => {
                tracing::info!(request_id = %ctx.request_id, user_id = %user.id, "Wrong password");
                return Err(AuthError::InvalidCredentials.into());
            }
        }

        self.tokens.prune_expired(user.id).await?;
        let roles = self.users.roles_for(user.id).await?;
        let tokens = self
            .tokens
            .issue(&user, &roles, client.ip_address.clone())
            .await?;

        tracing::info!(
            request_id = %ctx.request_id,
            user_id = %user.id,
            remember_me = request.remember_me,
            "User logged in"
        );

        Ok(LoginResponse::new(&user, roles, tokens))
    }

    pub async fn refresh(
        &self,
        request: RefreshRequest,
        client: &ClientContext,
    ) -> Result<LoginResponse, AppError> {
        let session = self
            .tokens
            .validate_and_rotate(&request.refresh_token, client.ip_address.clone())
            .await?;
        Ok(session.into())
    }

    /// Idempotent: unknown or already revoked tokens still succeed
    pub async fn logout(&self, request: RefreshRequest) -> Result<LogoutResponse, AppError> {
        let revoked = self.tokens.revoke(&request.refresh_token).await?;
        tracing::info!(revoked = revoked, "Logout");
        Ok(LogoutResponse { success: true })
    }

    pub async fn logout_everywhere(&self, user_id: Uuid) -> Result<LogoutAllResponse, AppError> {
        let revoked = self.tokens.revoke_all_for_user(user_id).await?;
        Ok(LogoutAllResponse {
            success: true,
            revoked,
        })
    }

    /// Activate or deactivate an account. Deactivation also revokes every
    /// refresh token of the account; role checks belong to the caller.
    pub async fn set_account_status(
        &self,
        user_id: Uuid,
        request: AccountStatusRequest,
    ) -> Result<AccountStatusResponse, AppError> {
        self.users.set_active(user_id, request.is_active).await?;

        let revoked = if request.is_active {
            0
        } else {
            self.tokens.revoke_all_for_user(user_id).await?
        };

        tracing::info!(
            user_id = %user_id,
            is_active = request.is_active,
            revoked = revoked,
            "Account status changed"
        );

        Ok(AccountStatusResponse {
            user_id,
            is_active: request.is_active,
            revoked,
        })
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<ProfileResponse, AppError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;
        let roles = self.users.roles_for(user.id).await?;
        Ok(ProfileResponse::new(&user, roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::{seed_default_roles, USER};
    use crate::auth::token_store::InMemoryRefreshTokenStore;
    use crate::configuration::JwtSettings;
    use crate::error::OperationStatus;
    use crate::users::InMemoryUserStore;

    fn settings() -> SignInSettings {
        SignInSettings {
            max_failed_attempts: 3,
            lockout_seconds: 300,
            password_hash_cost: 4,
            ..SignInSettings::default()
        }
    }

    fn signer() -> Arc<TokenSigner> {
        Arc::new(
            TokenSigner::new(&JwtSettings {
                secret: "service-test-secret-that-is-long-enough".to_string(),
                issuer: "test".to_string(),
                audience: None,
                access_token_expiry: 900,
                refresh_token_expiry: 604800,
                // Replays in these scenarios are sequential, not racing
                rotation_grace_seconds: 0,
            })
            .unwrap(),
        )
    }

    async fn service_with_stores(
        settings: SignInSettings,
    ) -> (AuthService, Arc<InMemoryUserStore>, Arc<InMemoryRefreshTokenStore>) {
        let users = Arc::new(InMemoryUserStore::new(settings.clone()));
        seed_default_roles(users.as_ref()).await.unwrap();
        let tokens = Arc::new(InMemoryRefreshTokenStore::new());
        let service = AuthService::new(users.clone(), tokens.clone(), signer(), settings);
        (service, users, tokens)
    }

    async fn service_with(settings: SignInSettings) -> (AuthService, Arc<InMemoryUserStore>) {
        let (service, users, _) = service_with_stores(settings).await;
        (service, users)
    }

    async fn service() -> (AuthService, Arc<InMemoryUserStore>) {
        service_with(settings()).await
    }

    fn sign_up_request(username: &str, email: &str) -> SignUpRequest {
        SignUpRequest {
            username: username.to_string(),
            password: "Password123".to_string(),
            first_name: Some("Alice".to_string()),
            last_name: Some("Liddell".to_string()),
            email: Some(email.to_string()),
            phone: None,
        }
    }

    fn login_request(identifier: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username_or_email: identifier.to_string(),
            password: password.to_string(),
            remember_me: false,
        }
    }

    fn status(result: Result<impl std::fmt::Debug, AppError>) -> OperationStatus {
        match result {
            Ok(_) => OperationStatus::Success,
            Err(e) => e.status(),
        }
    }

    #[tokio::test]
    async fn test_sign_up_assigns_default_role() {
        let (service, _) = service().await;
        let response = service
            .sign_up(sign_up_request("alice", "alice@example.com"))
            .await
            .unwrap();

        assert_eq!(response.username, "alice");
        assert_eq!(response.full_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(response.roles, vec![USER.to_string()]);
    }

    #[tokio::test]
    async fn test_sign_up_without_default_role_still_succeeds() {
        let settings = settings();
        let users = Arc::new(InMemoryUserStore::new(settings.clone()));
        let service = AuthService::new(
            users,
            Arc::new(InMemoryRefreshTokenStore::new()),
            signer(),
            settings,
        );

        let response = service
            .sign_up(sign_up_request("alice", "alice@example.com"))
            .await
            .unwrap();
        assert!(response.roles.is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_rejects_bad_input_and_duplicates() {
        let (service, _) = service().await;
        service
            .sign_up(sign_up_request("alice", "alice@example.com"))
            .await
            .unwrap();

        let mut weak = sign_up_request("bob", "bob@example.com");
        weak.password = "password".to_string();
        assert_eq!(status(service.sign_up(weak).await), OperationStatus::Invalid);

        assert_eq!(
            status(service.sign_up(sign_up_request("b", "bob@example.com")).await),
            OperationStatus::Invalid
        );
        assert_eq!(
            status(service.sign_up(sign_up_request("bob", "not-an-email")).await),
            OperationStatus::Invalid
        );
        assert_eq!(
            status(service.sign_up(sign_up_request("ALICE", "other@example.com")).await),
            OperationStatus::Conflict
        );
        assert_eq!(
            status(service.sign_up(sign_up_request("carol", "Alice@Example.com")).await),
            OperationStatus::Conflict
        );
    }

    #[tokio::test]
    async fn test_alice_login_refresh_and_reuse() {
        let (service, _) = service().await;
        service
            .sign_up(sign_up_request("alice", "alice@example.com"))
            .await
            .unwrap();
        let client = ClientContext::default();

        let login = service
            .login(login_request("alice@example.com", "Password123"), &client)
            .await
            .unwrap();
        assert_eq!(login.roles, vec![USER.to_string()]);
        assert!(!login.requires_two_factor);

        let until_expiry = login.tokens.refresh_token_expires_at - chrono::Utc::now();
        assert!(until_expiry > chrono::Duration::days(7) - chrono::Duration::minutes(1));
        assert!(until_expiry <= chrono::Duration::days(7));

        let rotated = service
            .refresh(
                RefreshRequest {
                    refresh_token: login.tokens.refresh_token.clone(),
                },
                &client,
            )
            .await
            .unwrap();
        assert_eq!(rotated.user_id, login.user_id);
        assert_ne!(rotated.tokens.refresh_token, login.tokens.refresh_token);
        assert_ne!(rotated.tokens.access_token, login.tokens.access_token);

        let replay = service
            .refresh(
                RefreshRequest {
                    refresh_token: login.tokens.refresh_token.clone(),
                },
                &client,
            )
            .await;
        assert_eq!(status(replay), OperationStatus::Forbidden);

        let newest = service
            .refresh(
                RefreshRequest {
                    refresh_token: rotated.tokens.refresh_token,
                },
                &client,
            )
            .await;
        assert_eq!(status(newest), OperationStatus::Forbidden);
    }

    #[tokio::test]
    async fn test_bob_wrong_password_then_lockout() {
        let (service, _, tokens) = service_with_stores(settings()).await;
        let bob = service
            .sign_up(sign_up_request("bob", "bob@example.com"))
            .await
            .unwrap();
        let client = ClientContext::default();

        let result = service.login(login_request("bob", "Wrong1234"), &client).await;
        assert_eq!(status(result), OperationStatus::Invalid);
        assert!(tokens.find_by_user(bob.user_id).await.unwrap().is_empty());

        let result = service.login(login_request("bob", "Wrong1234"), &client).await;
        assert_eq!(
            result.unwrap_err().auth_error(),
            Some(&AuthError::InvalidCredentials)
        );

        let result = service.login(login_request("bob", "Wrong1234"), &client).await;
        assert_eq!(
            result.unwrap_err().auth_error(),
            Some(&AuthError::AccountLockedOut)
        );

        // Correct password while locked is still refused
        let result = service.login(login_request("bob", "Password123"), &client).await;
        assert_eq!(status(result), OperationStatus::Forbidden);
        assert!(tokens.find_by_user(bob.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deactivation_revokes_sessions() {
        let (service, _, tokens) = service_with_stores(settings()).await;
        let gina = service
            .sign_up(sign_up_request("gina", "gina@example.com"))
            .await
            .unwrap();
        let client = ClientContext::default();
        let login = service
            .login(login_request("gina", "Password123"), &client)
            .await
            .unwrap();

        let response = service
            .set_account_status(gina.user_id, AccountStatusRequest { is_active: false })
            .await
            .unwrap();
        assert!(!response.is_active);
        assert_eq!(response.revoked, 1);
        assert!(tokens
            .find_by_user(gina.user_id)
            .await
            .unwrap()
            .iter()
            .all(|r| r.is_revoked()));

        let refresh = RefreshRequest {
            refresh_token: login.tokens.refresh_token,
        };
        assert_eq!(
            status(service.refresh(refresh, &client).await),
            OperationStatus::Forbidden
        );
        assert_eq!(
            status(service.login(login_request("gina", "Password123"), &client).await),
            OperationStatus::Forbidden
        );

        let response = service
            .set_account_status(gina.user_id, AccountStatusRequest { is_active: true })
            .await
            .unwrap();
        assert_eq!(response.revoked, 0);
        assert!(service
            .login(login_request("gina", "Password123"), &client)
            .await
            .is_ok());

        assert_eq!(
            status(
                service
                    .set_account_status(Uuid::new_v4(), AccountStatusRequest { is_active: false })
                    .await
            ),
            OperationStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_inactive_and_unknown_users() {
        let (service, users) = service().await;
        let carol = service
            .sign_up(sign_up_request("carol", "carol@example.com"))
            .await
            .unwrap();
        users.set_active(carol.user_id, false).await.unwrap();
        let client = ClientContext::default();

        let result = service.login(login_request("carol", "Password123"), &client).await;
        assert_eq!(
            result.unwrap_err().auth_error(),
            Some(&AuthError::AccountInactive)
        );

        let result = service.login(login_request("nobody", "Password123"), &client).await;
        assert_eq!(status(result), OperationStatus::NotFound);
    }

    #[tokio::test]
    async fn test_unconfirmed_email_not_allowed() {
        let (service, users) = service_with(SignInSettings {
            require_confirmed_email: true,
            ..settings()
        })
        .await;
        let dave = service
            .sign_up(sign_up_request("dave", "dave@example.com"))
            .await
            .unwrap();
        let client = ClientContext::default();

        let result = service.login(login_request("dave", "Password123"), &client).await;
        assert_eq!(
            result.unwrap_err().auth_error(),
            Some(&AuthError::SignInNotAllowed)
        );

        users.confirm_email(dave.user_id).unwrap();
        assert!(service
            .login(login_request("dave", "Password123"), &client)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (service, _) = service().await;
        service
            .sign_up(sign_up_request("erin", "erin@example.com"))
            .await
            .unwrap();
        let client = ClientContext::default();
        let login = service
            .login(login_request("erin", "Password123"), &client)
            .await
            .unwrap();
        let request = RefreshRequest {
            refresh_token: login.tokens.refresh_token.clone(),
        };

        assert!(service.logout(request.clone()).await.unwrap().success);
        assert!(service.logout(request.clone()).await.unwrap().success);

        // The revoked token is now a reuse signal
        assert_eq!(
            status(service.refresh(request, &client).await),
            OperationStatus::Forbidden
        );

        let malformed = RefreshRequest {
            refresh_token: "garbage".to_string(),
        };
        assert_eq!(status(service.logout(malformed).await), OperationStatus::Invalid);
    }

    #[tokio::test]
    async fn test_logout_everywhere_and_profile() {
        let (service, _) = service().await;
        let frank = service
            .sign_up(sign_up_request("frank", "frank@example.com"))
            .await
            .unwrap();
        let client = ClientContext::default();
        for _ in 0..2 {
            service
                .login(login_request("frank", "Password123"), &client)
                .await
                .unwrap();
        }

        let response = service.logout_everywhere(frank.user_id).await.unwrap();
        assert_eq!(response.revoked, 2);

        let profile = service.profile(frank.user_id).await.unwrap();
        assert_eq!(profile.username, "frank");
        assert_eq!(profile.roles, vec![USER.to_string()]);

        assert_eq!(
            status(service.profile(Uuid::new_v4()).await),
            OperationStatus::NotFound
        );
    }
}
