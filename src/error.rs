/// Error Handling Module
///
/// Unified error handling for the identity service. It covers:
/// 1. Domain-specific error types (validation, database, auth, config)
/// 2. The unified `AppError` used for control flow
/// 3. Classification into operation outcomes (`OperationStatus`)
/// 4. HTTP response mapping with structured logging
/// 5. Request-scoped error context

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

use crate::logger::current_request_id;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Validation errors for input data
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyField(String),
    TooShort(String, usize),
    TooLong(String, usize),
    InvalidFormat(String),
    SuspiciousContent(String),
    PossibleSQLInjection,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is required", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::SuspiciousContent(field) => {
                write!(f, "{} contains suspicious content", field)
            }
            ValidationError::PossibleSQLInjection => {
                write!(f, "input contains potentially dangerous SQL patterns")
            }
        }
    }
}

impl StdError for ValidationError {}

/// Database operation errors
#[derive(Debug)]
pub enum DatabaseError {
    UniqueConstraintViolation(String),
    NotFound(String),
    QueryExecution(String),
    ConnectionPool(String),
    UnexpectedError(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::UniqueConstraintViolation(msg) => {
                write!(f, "Duplicate entry: {}", msg)
            }
            DatabaseError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DatabaseError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
            DatabaseError::UnexpectedError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

/// Authentication and authorization errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong username/password combination
    InvalidCredentials,
    /// No account matches the supplied username or email
    UserNotFound,
    /// Account is deactivated, or its owner vanished
    AccountInactive,
    /// Too many failed password attempts
    AccountLockedOut,
    /// Account exists but may not sign in yet (e.g. unconfirmed email)
    SignInNotAllowed,
    /// Malformed or unknown token
    TokenInvalid,
    TokenExpired,
    /// A concurrent refresh already consumed this token
    TokenStale,
    /// A consumed or forged refresh token was presented; the chain is revoked
    TokenReuse,
    /// Authenticated, but missing the role the operation requires
    InsufficientRole,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid username or password"),
            AuthError::UserNotFound => write!(f, "User not found"),
            AuthError::AccountInactive => write!(f, "User account is inactive"),
            AuthError::AccountLockedOut => write!(f, "User account is locked out"),
            AuthError::SignInNotAllowed => write!(f, "User is not allowed to sign in"),
            AuthError::TokenInvalid => write!(f, "Invalid refresh token"),
            AuthError::TokenExpired => write!(f, "Refresh token has expired"),
            AuthError::TokenStale => write!(f, "Refresh token was already used"),
            AuthError::TokenReuse => write!(f, "Refresh token reuse detected"),
            AuthError::InsufficientRole => write!(f, "Insufficient privileges"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

/// Central error type that all application errors map to
#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Database(DatabaseError),
    Auth(AuthError),
    Config(ConfigError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

/// Outcome classes every operation result falls into.
///
/// Transport adapters only need this classification; the variants inside
/// `AppError` carry the detail for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    Invalid,
    NotFound,
    Conflict,
    Forbidden,
    Error,
}

impl OperationStatus {
    pub fn http_status(self) -> StatusCode {
        match self {
            OperationStatus::Success => StatusCode::OK,
            OperationStatus::Invalid => StatusCode::BAD_REQUEST,
            OperationStatus::NotFound => StatusCode::NOT_FOUND,
            OperationStatus::Conflict => StatusCode::CONFLICT,
            OperationStatus::Forbidden => StatusCode::FORBIDDEN,
            OperationStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    pub fn status(&self) -> OperationStatus {
        match self {
            AppError::Validation(_) => OperationStatus::Invalid,
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                OperationStatus::Conflict
            }
            AppError::Database(DatabaseError::NotFound(_)) => OperationStatus::NotFound,
            AppError::Database(_) => OperationStatus::Error,
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials
                | AuthError::TokenInvalid
                | AuthError::TokenExpired
                | AuthError::TokenStale => OperationStatus::Invalid,
                AuthError::UserNotFound => OperationStatus::NotFound,
                AuthError::AccountInactive
                | AuthError::AccountLockedOut
                | AuthError::SignInNotAllowed
                | AuthError::TokenReuse
                | AuthError::InsufficientRole => OperationStatus::Forbidden,
            },
            AppError::Config(_) | AppError::Internal(_) => OperationStatus::Error,
        }
    }

    /// Shorthand for matching a specific auth failure in callers and tests
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            AppError::Auth(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// FROM IMPLEMENTATIONS (Control Flow Error Conversion)
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // 23505 = unique_violation
            if db_err.code().as_deref() == Some("23505") {
                return AppError::Database(DatabaseError::UniqueConstraintViolation(
                    "Username or email already registered".to_string(),
                ));
            }
        }

        let error_msg = err.to_string();
        match err {
            sqlx::Error::RowNotFound => {
                AppError::Database(DatabaseError::NotFound("Record not found".to_string()))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Database(DatabaseError::ConnectionPool(error_msg))
            }
            sqlx::Error::Database(_) => {
                AppError::Database(DatabaseError::QueryExecution(error_msg))
            }
            _ => AppError::Database(DatabaseError::UnexpectedError(error_msg)),
        }
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl AppError {
    /// Stable machine-readable code plus the message that is safe to show
    fn public_code_and_message(&self) -> (&'static str, String) {
        match self {
            AppError::Validation(e) => ("VALIDATION_ERROR", e.to_string()),
            AppError::Database(e) => match e {
                DatabaseError::UniqueConstraintViolation(_) => ("DUPLICATE_ENTRY", e.to_string()),
                DatabaseError::NotFound(_) => ("NOT_FOUND", e.to_string()),
                DatabaseError::ConnectionPool(_) => (
                    "DATABASE_UNAVAILABLE",
                    "Database service temporarily unavailable".to_string(),
                ),
                _ => ("DATABASE_ERROR", "Database error occurred".to_string()),
            },
            AppError::Auth(e) => {
                let code = match e {
                    AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
                    AuthError::UserNotFound => "USER_NOT_FOUND",
                    AuthError::AccountInactive => "ACCOUNT_INACTIVE",
                    AuthError::AccountLockedOut => "ACCOUNT_LOCKED_OUT",
                    AuthError::SignInNotAllowed => "SIGN_IN_NOT_ALLOWED",
                    AuthError::TokenInvalid | AuthError::TokenExpired | AuthError::TokenStale => {
                        "TOKEN_INVALID"
                    }
                    AuthError::TokenReuse => "TOKEN_REUSE",
                    AuthError::InsufficientRole => "FORBIDDEN",
                };
                (code, e.to_string())
            }
            AppError::Config(_) => ("CONFIG_ERROR", "Server configuration error".to_string()),
            AppError::Internal(_) => ("INTERNAL_ERROR", "Internal server error".to_string()),
        }
    }
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let status = self.status_code();
        let (code, message) = self.public_code_and_message();

        let error_response = ErrorResponse::new(
            request_id.to_string(),
            message,
            code.to_string(),
            status.as_u16(),
        );

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                tracing::warn!(request_id = request_id, error = %self, "Duplicate entry attempt");
            }
            AppError::Database(e) => {
                tracing::error!(request_id = request_id, error = %e, "Database error");
            }
            AppError::Auth(AuthError::TokenReuse) => {
                tracing::warn!(request_id = request_id, error = %self, "Refresh token reuse rejected");
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

/// Implement ResponseError for Actix-web integration
///
/// The error id is the request id `LoggerMiddleware` assigned, so an error
/// body can be matched to its access log line.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = current_request_id().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        self.status().http_status()
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Error context for enhanced logging and debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn log_error(&self, error: &AppError) {
        let context = serde_json::json!({
            "request_id": self.request_id,
            "operation": self.operation,
            "user_id": self.user_id,
            "timestamp": self.timestamp.to_rfc3339(),
        });

        match error.status() {
            OperationStatus::Error => {
                tracing::error!(error = %error, context = ?context, "Operation failed");
            }
            _ => {
                tracing::warn!(error = %error, context = ?context, "Operation rejected");
            }
        }
    }
}
