use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub sign_in: SignInSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// Ten years
const MAX_TOKEN_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;
const MAX_ROTATION_GRACE_SECONDS: i64 = 60;

/// JWT signing settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64,   // seconds (900 = 15 minutes)
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64,  // seconds (604800 = 7 days)
    /// A rotated token presented again within this many seconds of its
    /// rotation is answered as stale instead of as reuse
    #[serde(default = "default_rotation_grace_seconds")]
    pub rotation_grace_seconds: i64,
}

impl JwtSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.secret".to_string()));
        }
        if !(1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&self.access_token_expiry) {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.access_token_expiry must be between 1 and {} seconds",
                MAX_TOKEN_LIFETIME_SECONDS
            )));
        }
        if !(1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&self.refresh_token_expiry) {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.refresh_token_expiry must be between 1 and {} seconds",
                MAX_TOKEN_LIFETIME_SECONDS
            )));
        }
        if !(0..=MAX_ROTATION_GRACE_SECONDS).contains(&self.rotation_grace_seconds) {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.rotation_grace_seconds must be between 0 and {}",
                MAX_ROTATION_GRACE_SECONDS
            )));
        }
        Ok(())
    }
}

/// Credential verification policy
#[derive(serde::Deserialize, Clone, Debug)]
pub struct SignInSettings {
    /// Consecutive failures before the account locks
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lockout_seconds")]
    pub lockout_seconds: i64,
    #[serde(default)]
    pub require_confirmed_email: bool,
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
    /// Role given to every new account when it exists
    #[serde(default = "default_role")]
    pub default_role: String,
}

impl Default for SignInSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_seconds: default_lockout_seconds(),
            require_confirmed_email: false,
            password_hash_cost: default_password_hash_cost(),
            default_role: default_role(),
        }
    }
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
}

impl Settings {
    /// Fail fast on values that would only surface at the first login.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt.validate()?;
        if self.sign_in.max_failed_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "sign_in.max_failed_attempts must be at least 1".to_string(),
            ));
        }
        if !(4..=31).contains(&self.sign_in.password_hash_cost) {
            return Err(ConfigError::InvalidValue(
                "sign_in.password_hash_cost must be between 4 and 31".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_access_token_expiry() -> i64 {
    15 * 60
}

fn default_refresh_token_expiry() -> i64 {
    7 * 24 * 60 * 60
}

fn default_rotation_grace_seconds() -> i64 {
    5
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_seconds() -> i64 {
    5 * 60
}

fn default_password_hash_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_role() -> String {
    crate::auth::roles::USER.to_string()
}

/// Load `configuration.{yaml,toml,json}` and `APP_`-prefixed environment
/// overrides, e.g. `APP_JWT__SECRET`.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
