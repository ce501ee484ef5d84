/// Authentication Routes
///
/// Thin adapters from HTTP to `AuthService`. Status codes come from the
/// `OperationStatus` of the returned error.

use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::auth::roles::{ADMIN, SUPER_ADMIN};
use crate::auth::{
    AccountStatusRequest, AuthService, Claims, ClientContext, LoginRequest, RefreshRequest,
    SignUpRequest,
};
use crate::error::{AppError, AuthError};

fn client_context(req: &HttpRequest) -> ClientContext {
    ClientContext {
        ip_address: req
            .connection_info()
            .realip_remote_addr()
            .map(str::to_string),
    }
}

/// POST /api/v1/auth/sign-up
///
/// # Errors
/// - 400: Validation errors (username, email, phone, names, password strength)
/// - 409: Username or email already registered
pub async fn sign_up(
    form: web::Json<SignUpRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let response = service.sign_up(form.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

/// POST /api/v1/auth/login
///
/// # Errors
/// - 400: Wrong password or malformed input
/// - 403: Account inactive, locked out, or not allowed to sign in
/// - 404: No account with that username or email
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let response = service
        .login(form.into_inner(), &client_context(&req))
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/auth/refresh
///
/// Rotates the refresh token. Presenting a consumed token revokes all of
/// the user's refresh tokens.
///
/// # Errors
/// - 400: Malformed, unknown, expired or concurrently consumed token
/// - 403: Reuse detected, or the owning account is inactive
pub async fn refresh(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let response = service
        .refresh(form.into_inner(), &client_context(&req))
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/auth/logout
pub async fn logout(
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let response = service.logout(form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// GET /api/v1/me
///
/// **Requires valid JWT access token**; claims are injected by `JwtMiddleware`.
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let response = service.profile(user_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/me/logout-all
pub async fn logout_all(
    claims: web::ReqData<Claims>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let response = service.logout_everywhere(user_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// PUT /api/v1/users/{id}/status
///
/// **Requires the Admin or SuperAdmin role.** Deactivating an account also
/// revokes all of its refresh tokens.
///
/// # Errors
/// - 403: Caller lacks an administrative role
/// - 404: No account with that id
pub async fn set_user_status(
    claims: web::ReqData<Claims>,
    path: web::Path<Uuid>,
    form: web::Json<AccountStatusRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    if !claims.has_any_role(&[ADMIN, SUPER_ADMIN]) {
        tracing::warn!(user_id = %claims.sub, "Account status change without admin role");
        return Err(AuthError::InsufficientRole.into());
    }

    let response = service
        .set_account_status(path.into_inner(), form.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}
