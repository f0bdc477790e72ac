use sqlx::FromRow;
use time::OffsetDateTime;

use super::password::{hash_password, verify_password, PasswordError};

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: i64,                    // 0 until the store assigns one
    pub username: String,           // unique
    pub email: String,              // unique
    pub password_hash: String,      // Argon2 PHC string
    pub full_name: String,
    pub created_at: OffsetDateTime, // UTC
    pub updated_at: OffsetDateTime, // UTC, refreshed on every update
}

impl User {
    /// Builds an unsaved user, hashing `password` on the way in.
    pub fn new(
        username: &str,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Self, PasswordError> {
        let password_hash = hash_password(password)?;
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            id: 0,
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash,
            full_name: full_name.to_owned(),
            created_at: now,
            updated_at: now,
        })
    }

    /// A malformed stored hash never matches.
    pub fn check_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_hash).unwrap_or(false)
    }

    pub fn set_password(&mut self, password: &str) -> Result<(), PasswordError> {
        self.password_hash = hash_password(password)?;
        Ok(())
    }
}
