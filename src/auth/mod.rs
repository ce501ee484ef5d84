/// Authentication module
///
/// Claims and JWT signing, password hashing, the refresh token protocol
/// with its store, and the orchestrator tying them to the user store.

mod claims;
mod jwt;
mod password;
mod protocol;
pub mod refresh_token;
pub mod roles;
mod service;
pub mod token_store;
mod types;

pub use claims::{ClaimSet, ClaimType, Claims, Destination};
pub use jwt::{SignedToken, TokenSigner};
pub use password::{
    hash_password, validate_password_strength, verify_password, verify_password_blocking,
};
pub use protocol::RefreshTokenService;
pub use service::AuthService;
pub use types::{
    AccountStatusRequest, AccountStatusResponse, ClientContext, LoginRequest, LoginResponse, LogoutAllResponse, LogoutResponse, ProfileResponse,
    RefreshRequest, Session, SignUpRequest, SignUpResponse, TokenPair,
};
