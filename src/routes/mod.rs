mod auth;
mod health_check;

pub use auth::{get_current_user, login, logout, logout_all, refresh, set_user_status, sign_up};
pub use health_check::health_check;
