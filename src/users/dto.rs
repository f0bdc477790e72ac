use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::repo_types::User;
use crate::users::services::{UserChanges, DEFAULT_PAGE_SIZE};

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Request body for `POST /users`.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
}

impl CreateUserRequest {
    pub fn normalize(&mut self) {
        self.username = self.username.trim().to_string();
        self.email = normalize_email(&self.email);
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.username.is_empty() {
            return Err("username is required");
        }
        if !is_valid_email(&self.email) {
            return Err("invalid email");
        }
        if self.password.is_empty() {
            return Err("password is required");
        }
        Ok(())
    }
}

/// Request body for `PATCH /users/:id`. Missing keys are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
}

impl UpdateUserRequest {
    pub fn normalize(&mut self) {
        if let Some(username) = self.username.as_mut() {
            *username = username.trim().to_string();
        }
        if let Some(email) = self.email.as_mut() {
            *email = normalize_email(email);
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.username.as_deref() == Some("") {
            return Err("username must not be empty");
        }
        if let Some(email) = &self.email {
            if !is_valid_email(email) {
                return Err("invalid email");
            }
        }
        if self.password.as_deref() == Some("") {
            return Err("password must not be empty");
        }
        Ok(())
    }
}

impl From<UpdateUserRequest> for UserChanges {
    fn from(r: UpdateUserRequest) -> Self {
        Self {
            username: r.username,
            email: r.email,
            password: r.password,
            full_name: r.full_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}
fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// User as returned to clients; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            full_name: u.full_name,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub users: Vec<PublicUser>,
    pub total_count: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    pub success: bool,
}
