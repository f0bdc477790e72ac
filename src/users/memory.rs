//! In-memory user repository, used with `USER_STORE=memory` and in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::users::repo::{RepoError, UniqueField, UserRepository};
use crate::users::repo_types::User;

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<i64, User>,
    last_id: i64,
}

impl Table {
    /// Mirrors the unique constraints on the `users` table.
    fn check_unique(&self, user: &User) -> Result<(), RepoError> {
        for row in self.rows.values().filter(|r| r.id != user.id) {
            if row.username == user.username {
                return Err(RepoError::Duplicate(UniqueField::Username));
            }
            if row.email == user.email {
                return Err(RepoError::Duplicate(UniqueField::Email));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    table: RwLock<Table>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, mut user: User) -> Result<User, RepoError> {
        let mut table = self.table.write().await;
        user.id = 0;
        table.check_unique(&user)?;
        table.last_id += 1;
        user.id = table.last_id;
        table.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: i64) -> Result<User, RepoError> {
        let table = self.table.read().await;
        table.rows.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_by_username(&self, username: &str) -> Result<User, RepoError> {
        let table = self.table.read().await;
        table
            .rows
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, RepoError> {
        let table = self.table.read().await;
        table
            .rows
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn update(&self, mut user: User) -> Result<User, RepoError> {
        let mut table = self.table.write().await;
        let created_at = match table.rows.get(&user.id) {
            Some(existing) => existing.created_at,
            None => return Err(RepoError::NotFound),
        };
        table.check_unique(&user)?;
        user.created_at = created_at;
        user.updated_at = OffsetDateTime::now_utc();
        table.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete(&self, id: i64) -> Result<(), RepoError> {
        let mut table = self.table.write().await;
        table.rows.remove(&id).map(|_| ()).ok_or(RepoError::NotFound)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64), RepoError> {
        let table = self.table.read().await;
        let page = table
            .rows
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, table.rows.len() as i64))
    }
}
