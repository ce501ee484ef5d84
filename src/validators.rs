/// Input validators for account data
/// Features:
/// 1. DoS Protection: Input length limits
/// 2. Format checks for usernames, emails and phone numbers
/// 3. Control-character and SQL-pattern screening for free-text names

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 64;
const MAX_NAME_LENGTH: usize = 128;
const MAX_LOGIN_IDENTIFIER_LENGTH: usize = MAX_EMAIL_LENGTH;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();

    // No '@': a username must never collide with an email used to log in
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").unwrap();

    // E.164-ish: optional leading +, 7 to 15 digits
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9]{7,15}$").unwrap();

    static ref SQL_INJECTION_PATTERNS: [Regex; 4] = [
        Regex::new(r"(?i)\s+UNION\s+").unwrap(),
        Regex::new(r"(--|;|/\*|\*/)").unwrap(),
        Regex::new(r"(?i)\b(SLEEP|WAITFOR|BENCHMARK)\s*\(").unwrap(),
        Regex::new(r#"(?i)(\bOR\b|\bAND\b)\s*(['"][0-9]*['"]|[0-9]*)\s*=\s*(['"][0-9]*['"]|[0-9]*|True|False)"#).unwrap(),
    ];
}

/// Validates a username and returns it trimmed
pub fn is_valid_username(username: &str) -> Result<String, ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }

    if trimmed.chars().count() < MIN_USERNAME_LENGTH {
        return Err(ValidationError::TooShort(
            "username".to_string(),
            MIN_USERNAME_LENGTH,
        ));
    }

    if trimmed.len() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong(
            "username".to_string(),
            MAX_USERNAME_LENGTH,
        ));
    }

    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("username".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Validates email address
/// - Checks format using RFC 5322 simplified regex
/// - Verifies length constraints
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }

    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    // Local part over 64 chars or a second @ is a phishing indicator
    if let Some((local_part, _)) = trimmed.split_once('@') {
        if local_part.len() > 64 || trimmed.matches('@').count() != 1 {
            return Err(ValidationError::SuspiciousContent("email".to_string()));
        }
    }

    Ok(trimmed.to_string())
}

/// Validates a phone number; separators (spaces, dashes, parentheses) are stripped
pub fn is_valid_phone(phone: &str) -> Result<String, ValidationError> {
    let compact: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if compact.is_empty() {
        return Err(ValidationError::EmptyField("phone".to_string()));
    }

    if !PHONE_REGEX.is_match(&compact) {
        return Err(ValidationError::InvalidFormat("phone".to_string()));
    }

    Ok(compact)
}

/// Validates a first or last name
/// - Checks length constraints
/// - Validates against control characters
/// - Detects SQL injection patterns
pub fn is_valid_name(field: &str, name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong(field.to_string(), MAX_NAME_LENGTH));
    }

    if has_suspicious_name_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent(field.to_string()));
    }

    if contains_sql_injection_patterns(trimmed) {
        return Err(ValidationError::PossibleSQLInjection);
    }

    Ok(trimmed.to_string())
}

/// Validates the login identifier, which may be a username or an email
pub fn is_valid_login_identifier(identifier: &str) -> Result<String, ValidationError> {
    let trimmed = identifier.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username_or_email".to_string()));
    }

    if trimmed.len() > MAX_LOGIN_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(
            "username_or_email".to_string(),
            MAX_LOGIN_IDENTIFIER_LENGTH,
        ));
    }

    Ok(trimmed.to_string())
}

/// Treats absent and blank optional fields alike
pub fn optional<F>(value: Option<&str>, validate: F) -> Result<Option<String>, ValidationError>
where
    F: FnOnce(&str) -> Result<String, ValidationError>,
{
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => validate(v).map(Some),
    }
}

fn has_suspicious_name_patterns(name: &str) -> bool {
    if name.chars().any(|c| c.is_control()) {
        return true;
    }

    let special_char_count = name
        .chars()
        .filter(|c| {
            !c.is_alphanumeric() && !c.is_whitespace() && !matches!(c, '-' | '.' | '_' | '\'')
        })
        .count();

    special_char_count > 5
}

fn contains_sql_injection_patterns(input: &str) -> bool {
    SQL_INJECTION_PATTERNS.iter().any(|pattern| pattern.is_match(input))
}
