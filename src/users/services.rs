use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::users::error::UserError;
use crate::users::repo::{RepoError, UniqueField, UserRepository};
use crate::users::repo_types::User;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Fields to change on an existing user. `None` leaves the field untouched;
/// `Some("")` is a real value.
#[derive(Debug, Default, Clone)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
}

/// Clamps a 1-based page request into `(offset, limit)`.
///
/// `page_size <= 0` becomes [`DEFAULT_PAGE_SIZE`], anything above
/// [`MAX_PAGE_SIZE`] is capped, and pages below 1 read from offset 0.
pub fn page_window(page: i64, page_size: i64) -> (i64, i64) {
    let limit = if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(MAX_PAGE_SIZE)
    };
    let offset = page.saturating_sub(1).saturating_mul(limit).max(0);
    (offset, limit)
}

/// Business rules for user accounts. Holds no state besides the repository
/// handle, so one instance is shared across all requests.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Fails with a conflict when `value` already belongs to a live user.
    async fn ensure_available(&self, field: UniqueField, value: &str) -> Result<(), UserError> {
        let lookup = match field {
            UniqueField::Username => self.repo.get_by_username(value).await,
            UniqueField::Email => self.repo.get_by_email(value).await,
        };
        match lookup {
            Ok(_) => {
                warn!(%field, "already in use");
                Err(UserError::taken(field))
            }
            Err(RepoError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, password))]
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<User, UserError> {
        self.ensure_available(UniqueField::Username, username).await?;
        self.ensure_available(UniqueField::Email, email).await?;

        let user = User::new(username, email, password, full_name)?;
        // The insert can still lose a race against a concurrent create; the
        // store's unique constraint reports that as a duplicate.
        let user = self.repo.create(user).await?;

        info!(user_id = user.id, "user created");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> Result<User, UserError> {
        Ok(self.repo.get_by_id(id).await?)
    }

    #[instrument(skip(self, changes), fields(
        username = changes.username.is_some(),
        email = changes.email.is_some(),
        password = changes.password.is_some(),
        full_name = changes.full_name.is_some(),
    ))]
    pub async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, UserError> {
        let mut user = self.repo.get_by_id(id).await?;

        if let Some(username) = changes.username {
            if username != user.username {
                self.ensure_available(UniqueField::Username, &username).await?;
                user.username = username;
            }
        }

        if let Some(email) = changes.email {
            if email != user.email {
                self.ensure_available(UniqueField::Email, &email).await?;
                user.email = email;
            }
        }

        if let Some(password) = changes.password {
            user.set_password(&password)?;
        }

        if let Some(full_name) = changes.full_name {
            user.full_name = full_name;
        }

        let user = self.repo.update(user).await?;
        info!(user_id = user.id, "user updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: i64) -> Result<(), UserError> {
        self.repo.delete(id).await?;
        info!(user_id = id, "user deleted");
        Ok(())
    }

    /// Returns one page of users and the total number of users.
    #[instrument(skip(self))]
    pub async fn list_users(&self, page: i64, page_size: i64) -> Result<(Vec<User>, i64), UserError> {
        let (offset, limit) = page_window(page, page_size);
        Ok(self.repo.list(offset, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::users::error::{EMAIL_TAKEN, USERNAME_TAKEN};
    use crate::users::memory::InMemoryUserRepository;

    fn service() -> UserService {
        UserService::new(Arc::new(InMemoryUserRepository::new()))
    }

    async fn seed(svc: &UserService, n: usize) {
        for i in 0..n {
            svc.create_user(&format!("user{i}"), &format!("user{i}@x.com"), "pw", "")
                .await
                .unwrap();
        }
    }

    /// Every call fails as if the database were unreachable.
    struct BrokenRepo;

    #[async_trait]
    impl UserRepository for BrokenRepo {
        async fn create(&self, _: User) -> Result<User, RepoError> {
            Err(RepoError::Storage(sqlx::Error::PoolClosed))
        }
        async fn get_by_id(&self, _: i64) -> Result<User, RepoError> {
            Err(RepoError::Storage(sqlx::Error::PoolClosed))
        }
        async fn get_by_username(&self, _: &str) -> Result<User, RepoError> {
            Err(RepoError::Storage(sqlx::Error::PoolClosed))
        }
        async fn get_by_email(&self, _: &str) -> Result<User, RepoError> {
            Err(RepoError::Storage(sqlx::Error::PoolClosed))
        }
        async fn update(&self, _: User) -> Result<User, RepoError> {
            Err(RepoError::Storage(sqlx::Error::PoolClosed))
        }
        async fn delete(&self, _: i64) -> Result<(), RepoError> {
            Err(RepoError::Storage(sqlx::Error::PoolClosed))
        }
        async fn list(&self, _: i64, _: i64) -> Result<(Vec<User>, i64), RepoError> {
            Err(RepoError::Storage(sqlx::Error::PoolClosed))
        }
    }

    /// Lookups never see existing rows, as when two creates race past the
    /// pre-checks; the insert still hits the unique constraint.
    struct BlindLookups(InMemoryUserRepository);

    #[async_trait]
    impl UserRepository for BlindLookups {
        async fn create(&self, user: User) -> Result<User, RepoError> {
            self.0.create(user).await
        }
        async fn get_by_id(&self, id: i64) -> Result<User, RepoError> {
            self.0.get_by_id(id).await
        }
        async fn get_by_username(&self, _: &str) -> Result<User, RepoError> {
            Err(RepoError::NotFound)
        }
        async fn get_by_email(&self, _: &str) -> Result<User, RepoError> {
            Err(RepoError::NotFound)
        }
        async fn update(&self, user: User) -> Result<User, RepoError> {
            self.0.update(user).await
        }
        async fn delete(&self, id: i64) -> Result<(), RepoError> {
            self.0.delete(id).await
        }
        async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64), RepoError> {
            self.0.list(offset, limit).await
        }
    }

    /// Lookups hang, like a stalled connection.
    struct StalledRepo;

    #[async_trait]
    impl UserRepository for StalledRepo {
        async fn create(&self, _: User) -> Result<User, RepoError> {
            std::future::pending().await
        }
        async fn get_by_id(&self, _: i64) -> Result<User, RepoError> {
            std::future::pending().await
        }
        async fn get_by_username(&self, _: &str) -> Result<User, RepoError> {
            std::future::pending().await
        }
        async fn get_by_email(&self, _: &str) -> Result<User, RepoError> {
            std::future::pending().await
        }
        async fn update(&self, _: User) -> Result<User, RepoError> {
            std::future::pending().await
        }
        async fn delete(&self, _: i64) -> Result<(), RepoError> {
            std::future::pending().await
        }
        async fn list(&self, _: i64, _: i64) -> Result<(Vec<User>, i64), RepoError> {
            std::future::pending().await
        }
    }

    #[test]
    fn page_window_normalises_input() {
        assert_eq!(page_window(1, 3), (0, 3));
        assert_eq!(page_window(2, 3), (3, 3));
        assert_eq!(page_window(0, 3), (0, 3));
        assert_eq!(page_window(-4, 3), (0, 3));
        assert_eq!(page_window(1, 0), (0, DEFAULT_PAGE_SIZE));
        assert_eq!(page_window(2, -1), (10, DEFAULT_PAGE_SIZE));
        assert_eq!(page_window(1, 1000), (0, MAX_PAGE_SIZE));
        assert_eq!(page_window(3, 1000), (200, MAX_PAGE_SIZE));
        assert_eq!(page_window(i64::MAX, 100).1, 100);
    }

    #[tokio::test]
    async fn create_user_returns_saved_user() {
        let svc = service();
        let user = svc
            .create_user("alice", "alice@x.com", "pw123", "Alice A")
            .await
            .unwrap();

        assert!(user.id > 0);
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@x.com");
        assert_eq!(user.full_name, "Alice A");
        assert_eq!(user.created_at, user.updated_at);
        assert_ne!(user.password_hash, "pw123");
        assert!(user.check_password("pw123"));
        assert_eq!(svc.get_user(user.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let svc = service();
        svc.create_user("alice", "alice@x.com", "pw123", "Alice A")
            .await
            .unwrap();

        let err = svc
            .create_user("alice", "bob@x.com", "pw456", "Bob B")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Conflict(USERNAME_TAKEN)));
        assert_eq!(err.to_string(), "username already taken");
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let svc = service();
        svc.create_user("alice", "alice@x.com", "pw123", "Alice A")
            .await
            .unwrap();

        let err = svc
            .create_user("bob", "alice@x.com", "pw456", "Bob B")
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Conflict(EMAIL_TAKEN)));
    }

    #[tokio::test]
    async fn racing_create_is_still_a_conflict() {
        let svc = UserService::new(Arc::new(BlindLookups(InMemoryUserRepository::new())));
        svc.create_user("alice", "alice@x.com", "pw", "").await.unwrap();

        let err = svc.create_user("alice", "other@x.com", "pw", "").await.unwrap_err();
        assert!(matches!(err, UserError::Conflict(USERNAME_TAKEN)));
        let err = svc.create_user("other", "alice@x.com", "pw", "").await.unwrap_err();
        assert!(matches!(err, UserError::Conflict(EMAIL_TAKEN)));
    }

    #[tokio::test]
    async fn update_full_name_only_leaves_other_fields() {
        let svc = service();
        let before = svc
            .create_user("alice", "alice@x.com", "pw123", "Alice A")
            .await
            .unwrap();

        let after = svc
            .update_user(
                before.id,
                UserChanges {
                    full_name: Some("Alice B".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(after.full_name, "Alice B");
        assert_eq!(after.username, before.username);
        assert_eq!(after.email, before.email);
        assert_eq!(after.password_hash, before.password_hash);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn update_can_set_empty_full_name() {
        let svc = service();
        let user = svc.create_user("alice", "alice@x.com", "pw", "Alice A").await.unwrap();
        let user = svc
            .update_user(
                user.id,
                UserChanges {
                    full_name: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(user.full_name, "");
    }

    #[tokio::test]
    async fn update_password_rehashes() {
        let svc = service();
        let user = svc.create_user("alice", "alice@x.com", "old", "").await.unwrap();
        let user = svc
            .update_user(
                user.id,
                UserChanges {
                    password: Some("new".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(user.check_password("new"));
        assert!(!user.check_password("old"));
        assert!(svc.get_user(user.id).await.unwrap().check_password("new"));
    }

    #[tokio::test]
    async fn update_to_own_username_and_email_is_not_a_conflict() {
        let svc = service();
        let user = svc.create_user("alice", "alice@x.com", "pw", "").await.unwrap();
        let updated = svc
            .update_user(
                user.id,
                UserChanges {
                    username: Some("alice".into()),
                    email: Some("alice@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.username, "alice");
    }

    #[tokio::test]
    async fn update_to_taken_username_or_email_conflicts() {
        let svc = service();
        svc.create_user("alice", "alice@x.com", "pw", "").await.unwrap();
        let bob = svc.create_user("bob", "bob@x.com", "pw", "").await.unwrap();

        let err = svc
            .update_user(
                bob.id,
                UserChanges {
                    username: Some("alice".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Conflict(USERNAME_TAKEN)));

        let err = svc
            .update_user(
                bob.id,
                UserChanges {
                    email: Some("alice@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Conflict(EMAIL_TAKEN)));

        // nothing was written
        assert_eq!(svc.get_user(bob.id).await.unwrap(), bob);
    }

    #[tokio::test]
    async fn update_missing_user_is_not_found() {
        let svc = service();
        let err = svc
            .update_user(
                99,
                UserChanges {
                    full_name: Some("x".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::NotFound));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let svc = service();
        let user = svc.create_user("alice", "alice@x.com", "pw", "").await.unwrap();
        svc.delete_user(user.id).await.unwrap();

        assert!(matches!(svc.get_user(user.id).await, Err(UserError::NotFound)));
        assert!(matches!(svc.delete_user(user.id).await, Err(UserError::NotFound)));
    }

    #[tokio::test]
    async fn list_users_pages_through_everyone() {
        let svc = service();
        seed(&svc, 5).await;

        let (users, total) = svc.list_users(1, 3).await.unwrap();
        assert_eq!((users.len(), total), (3, 5));
        let (users, total) = svc.list_users(2, 3).await.unwrap();
        assert_eq!((users.len(), total), (2, 5));
        assert_eq!(users[0].username, "user3");
        let (users, total) = svc.list_users(3, 3).await.unwrap();
        assert_eq!((users.len(), total), (0, 5));
    }

    #[tokio::test]
    async fn list_users_clamps_page_size() {
        let svc = service();
        seed(&svc, 12).await;

        let (users, _) = svc.list_users(1, 0).await.unwrap();
        assert_eq!(users.len(), 10);
        let (users, _) = svc.list_users(0, -5).await.unwrap();
        assert_eq!(users.len(), 10);
        let (users, total) = svc.list_users(1, 500).await.unwrap();
        assert_eq!((users.len(), total), (12, 12));
    }

    #[tokio::test]
    async fn storage_errors_propagate() {
        let svc = UserService::new(Arc::new(BrokenRepo));

        assert!(matches!(
            svc.create_user("a", "a@x.com", "pw", "").await,
            Err(UserError::Storage(_))
        ));
        assert!(matches!(svc.get_user(1).await, Err(UserError::Storage(_))));
        assert!(matches!(
            svc.update_user(1, UserChanges::default()).await,
            Err(UserError::Storage(_))
        ));
        assert!(matches!(svc.delete_user(1).await, Err(UserError::Storage(_))));
        assert!(matches!(svc.list_users(1, 10).await, Err(UserError::Storage(_))));
    }

    #[tokio::test]
    async fn caller_timeout_aborts_stalled_call() {
        let svc = UserService::new(Arc::new(StalledRepo));
        let res = tokio::time::timeout(Duration::from_millis(20), svc.get_user(1)).await;
        assert!(res.is_err());
    }
}
