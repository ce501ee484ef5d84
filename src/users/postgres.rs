use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewUser, PasswordCheck, User, UserStore};
use crate::auth::{hash_password, verify_password_blocking};
use crate::configuration::SignInSettings;
use crate::error::{AppError, DatabaseError};

const USER_COLUMNS: &str = "id, username, email, phone, first_name, last_name, \
     email_confirmed, phone_confirmed, is_active, created_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: Option<String>,
    phone: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email_confirmed: bool,
    phone_confirmed: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            phone: row.phone,
            first_name: row.first_name,
            last_name: row.last_name,
            email_confirmed: row.email_confirmed,
            phone_confirmed: row.phone_confirmed,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// `users`, `roles` and `user_roles` tables
pub struct PgUserStore {
    pool: PgPool,
    settings: SignInSettings,
}

impl PgUserStore {
    pub fn new(pool: PgPool, settings: SignInSettings) -> Self {
        Self { pool, settings }
    }

    async fn find_one(&self, column: &str, value: String) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, column);
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_uppercase()
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, new_user: NewUser, password: &str) -> Result<User, AppError> {
        let password_hash = hash_password(password, self.settings.password_hash_cost)?;
        let normalized_email = new_user.email.as_deref().map(normalize);

        let query = format!(
            r#"
            INSERT INTO users (id, username, normalized_username, email, normalized_email,
                               phone, first_name, last_name, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&new_user.username)
            .bind(normalize(&new_user.username))
            .bind(&new_user.email)
            .bind(normalized_email)
            .bind(&new_user.phone)
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .bind(password_hash)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        self.find_one("normalized_username", normalize(username)).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_one("normalized_email", normalize(email)).await
    }

    async fn check_password(
        &self,
        user: &User,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<PasswordCheck, AppError> {
        let (password_hash, lockout_end, email_confirmed) =
            sqlx::query_as::<_, (String, Option<DateTime<Utc>>, bool)>(
                "SELECT password_hash, lockout_end, email_confirmed FROM users WHERE id = $1",
            )
            .bind(user.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("User not found".to_string()))?;

        if lockout_end.map_or(false, |end| end > now) {
            return Ok(PasswordCheck::LockedOut);
        }

        if !verify_password_blocking(password, &password_hash).await? {
            // Counter increment and lockout decision happen in one statement
            let locked = sqlx::query_scalar::<_, bool>(
                r#"
                UPDATE users
                SET failed_attempts = CASE WHEN failed_attempts + 1 >= $2 THEN 0
                                           ELSE failed_attempts + 1 END,
                    lockout_end = CASE WHEN failed_attempts + 1 >= $2 THEN $3
                                       ELSE lockout_end END
                WHERE id = $1
                RETURNING lockout_end IS NOT NULL AND lockout_end > $4
                "#,
            )
            .bind(user.id)
            .bind(self.settings.max_failed_attempts as i32)
            .bind(now + Duration::seconds(self.settings.lockout_seconds))
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

            return Ok(if locked {
                PasswordCheck::LockedOut
            } else {
                PasswordCheck::Failed
            });
        }

        sqlx::query("UPDATE users SET failed_attempts = 0, lockout_end = NULL WHERE id = $1")
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        if self.settings.require_confirmed_email && !email_confirmed {
            return Ok(PasswordCheck::NotAllowed);
        }

        Ok(PasswordCheck::Success)
    }

    async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
            .bind(user_id)
            .bind(is_active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("User not found".to_string()).into());
        }
        Ok(())
    }

    async fn roles_for(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        let roles = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn role_exists(&self, role: &str) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM roles WHERE normalized_name = $1)",
        )
        .bind(normalize(role))
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn ensure_role(&self, role: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO roles (id, name, normalized_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (normalized_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(role.trim())
        .bind(normalize(role))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_to_role(&self, user_id: Uuid, role: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE normalized_name = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(normalize(role))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && !self.role_exists(role).await? {
            return Err(DatabaseError::NotFound(format!("Role {} not found", role)).into());
        }
        Ok(())
    }
}
