//! Authentication and the two-role authorization gate.
//!
//! A [`Session`] is an explicit value handed to every operation that
//! needs authorization; there is no ambient current-user state. Dropping
//! the session is logout.

use sqlx::PgPool;

use crate::model::Role;
use crate::{AppError, AppResult};

pub const AUTH_INVALID_CREDENTIALS: &str = "AUTH/INVALID_CREDENTIALS";
pub const AUTH_ADMIN_REQUIRED: &str = "AUTH/ADMIN_REQUIRED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Record update/delete and all user management require the admin
    /// role; creation and listing only need an authenticated session.
    pub fn require_admin(&self, operation: &str) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(
                AppError::new(AUTH_ADMIN_REQUIRED, "This operation is restricted to admins")
                    .with_context("operation", operation.to_string())
                    .with_context("username", self.username.clone()),
            )
        }
    }
}

/// Exact match against the stored credentials. The failure message never
/// distinguishes an unknown user from a wrong password.
///
/// The `users` table stores passwords in clear and is shared with the
/// deployed system; the comparison must stay an exact text match against
/// that column. See DESIGN.md for the decision record on this known
/// weakness.
pub async fn authenticate(pool: &PgPool, username: &str, password: &str) -> AppResult<Session> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT role FROM users WHERE username = $1 AND password = $2")
            .bind(username)
            .bind(password)
            .fetch_optional(pool)
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "authenticate"))?;

    match row {
        Some((flag,)) => {
            let session = Session {
                username: username.to_string(),
                role: Role::from_flag(flag),
            };
            tracing::info!(
                target: "pdireg",
                event = "login",
                username = %session.username,
                role = %session.role.as_str()
            );
            Ok(session)
        }
        None => {
            tracing::warn!(target: "pdireg", event = "login_failed", username = %username);
            Err(AppError::new(
                AUTH_INVALID_CREDENTIALS,
                "Unknown username or wrong password",
            ))
        }
    }
}
