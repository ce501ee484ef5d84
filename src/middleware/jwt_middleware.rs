/// JWT Authentication Middleware
///
/// Validates the bearer access token from the Authorization header and
/// injects its claims into request extensions for route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::TokenSigner;

const BEARER_PREFIX: &str = "Bearer ";

/// Must wrap every route that reads `web::ReqData<Claims>`.
pub struct JwtMiddleware {
    signer: Arc<TokenSigner>,
}

impl JwtMiddleware {
    pub fn new(signer: Arc<TokenSigner>) -> Self {
        Self { signer }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            signer: self.signer.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    signer: Arc<TokenSigner>,
}

fn unauthorized(reason: &'static str, message: &str, code: &str) -> Error {
    let response = HttpResponse::Unauthorized().json(serde_json::json!({
        "error": message,
        "code": code
    }));
    actix_web::error::InternalError::from_response(reason, response).into()
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let token = match token {
            Some(token) => token,
            None => {
                tracing::warn!(path = %req.path(), "Missing or invalid Authorization header");
                let error = unauthorized(
                    "Unauthorized",
                    "Missing or invalid authorization header",
                    "UNAUTHORIZED",
                );
                return Box::pin(async move { Err(error) });
            }
        };

        match self.signer.validate_access_token(&token) {
            Ok(claims) => {
                tracing::debug!(user_id = %claims.sub, "JWT validated successfully");
                req.extensions_mut().insert(claims);

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::warn!("JWT validation failed: {}", e);
                let error = unauthorized("Invalid token", "Invalid or expired token", "TOKEN_INVALID");
                Box::pin(async move { Err(error) })
            }
        }
    }
}
