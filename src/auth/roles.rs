/// Built-in roles

use crate::error::AppError;
use crate::users::UserStore;

pub const USER: &str = "User";
pub const ADMIN: &str = "Admin";
pub const SUPER_ADMIN: &str = "SuperAdmin";

pub const DEFAULT_ROLES: [&str; 3] = [USER, ADMIN, SUPER_ADMIN];

/// Creates any missing built-in role; returns how many were created
pub async fn seed_default_roles(users: &dyn UserStore) -> Result<usize, AppError> {
    let mut created = 0;
    for role in DEFAULT_ROLES {
        if users.ensure_role(role).await? {
            tracing::info!(role = role, "Seeded role");
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::SignInSettings;
    use crate::users::InMemoryUserStore;

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let users = InMemoryUserStore::new(SignInSettings::default());

        assert_eq!(seed_default_roles(&users).await.unwrap(), 3);
        assert_eq!(seed_default_roles(&users).await.unwrap(), 0);
        for role in DEFAULT_ROLES {
            assert!(users.role_exists(role).await.unwrap());
        }
    }
}
