use std::fmt;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;

use crate::users::repo_types::User;

/// Columns guarded by a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Username => f.write_str("username"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,
    #[error("duplicate {0}")]
    Duplicate(UniqueField),
    #[error("storage error: {0}")]
    Storage(#[source] sqlx::Error),
}

/// Persistence operations the user service depends on.
///
/// Every method is a single round trip; dropping the returned future
/// abandons the call.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Inserts `user` and returns it with the store-assigned id.
    async fn create(&self, user: User) -> Result<User, RepoError>;
    async fn get_by_id(&self, id: i64) -> Result<User, RepoError>;
    async fn get_by_username(&self, username: &str) -> Result<User, RepoError>;
    async fn get_by_email(&self, email: &str) -> Result<User, RepoError>;
    /// Writes every mutable column of `user` and refreshes `updated_at`.
    async fn update(&self, user: User) -> Result<User, RepoError>;
    async fn delete(&self, id: i64) -> Result<(), RepoError>;
    /// One page ordered by id, plus the count of all rows.
    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64), RepoError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Maps a unique constraint name from the `users` migration to its column.
fn unique_field(constraint: Option<&str>) -> Option<UniqueField> {
    match constraint? {
        "users_username_key" => Some(UniqueField::Username),
        "users_email_key" => Some(UniqueField::Email),
        _ => None,
    }
}

fn classify(err: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if let Some(field) = unique_field(db_err.constraint()) {
                return RepoError::Duplicate(field);
            }
        }
    }
    RepoError::Storage(err)
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepoError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, full_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, password_hash, full_name, created_at, updated_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(classify)
    }

    async fn get_by_id(&self, id: i64) -> Result<User, RepoError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?
        .ok_or(RepoError::NotFound)
    }

    async fn get_by_username(&self, username: &str) -> Result<User, RepoError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?
        .ok_or(RepoError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, RepoError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?
        .ok_or(RepoError::NotFound)
    }

    async fn update(&self, user: User) -> Result<User, RepoError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username = $1, email = $2, password_hash = $3, full_name = $4, updated_at = $5
            WHERE id = $6
            RETURNING id, username, email, password_hash, full_name, created_at, updated_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(OffsetDateTime::now_utc())
        .bind(user.id)
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?
        .ok_or(RepoError::NotFound)
    }

    async fn delete(&self, id: i64) -> Result<(), RepoError> {
        let result = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64), RepoError> {
        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, full_name, created_at, updated_at
            FROM users
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .map_err(classify)?;

        let total = sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*) FROM users"#)
            .fetch_one(&self.db)
            .await
            .map_err(classify)?;

        Ok((rows, total))
    }
}
