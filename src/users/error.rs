use thiserror::Error;

use crate::users::password::PasswordError;
use crate::users::repo::{RepoError, UniqueField};

pub const USERNAME_TAKEN: &str = "username already taken";
pub const EMAIL_TAKEN: &str = "email already registered";

/// Errors surfaced by the user service.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("credential error: {0}")]
    Credential(#[from] PasswordError),
    #[error("storage error: {0}")]
    Storage(#[source] sqlx::Error),
}

impl UserError {
    pub(crate) fn taken(field: UniqueField) -> Self {
        match field {
            UniqueField::Username => UserError::Conflict(USERNAME_TAKEN),
            UniqueField::Email => UserError::Conflict(EMAIL_TAKEN),
        }
    }
}

impl From<RepoError> for UserError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => UserError::NotFound,
            RepoError::Duplicate(field) => UserError::taken(field),
            RepoError::Storage(e) => UserError::Storage(e),
        }
    }
}
