use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::{AppConfig, StoreKind};
use crate::users::{
    memory::InMemoryUserRepository,
    repo::{PgUserRepository, UserRepository},
    services::UserService,
};

#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let repo: Arc<dyn UserRepository> = match config.store {
            StoreKind::Postgres => {
                let db = PgPoolOptions::new()
                    .max_connections(config.database.max_connections)
                    .connect_with(config.database.connect_options()?)
                    .await
                    .context("connect to database")?;

                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                info!("database ready");

                Arc::new(PgUserRepository::new(db))
            }
            StoreKind::Memory => {
                warn!("using in-memory user store; data is lost on exit");
                Arc::new(InMemoryUserRepository::new())
            }
        };

        Ok(Self::from_parts(UserService::new(repo), config))
    }

    pub fn from_parts(users: UserService, config: Arc<AppConfig>) -> Self {
        Self { users, config }
    }

    /// Fresh state over an empty in-memory store.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        let config = Arc::new(AppConfig {
            store: StoreKind::Memory,
            ..AppConfig::default()
        });
        let users = UserService::new(Arc::new(InMemoryUserRepository::new()));
        Self::from_parts(users, config)
    }
}
