use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

/// Which repository backs the user service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "memory" => Ok(StoreKind::Memory),
            other => anyhow::bail!("unknown USER_STORE {other:?}, expected postgres or memory"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Takes precedence over the discrete fields below.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> anyhow::Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url).context("parse DATABASE_URL");
        }
        let ssl_mode = PgSslMode::from_str(&self.ssl_mode)
            .with_context(|| format!("invalid DB_SSLMODE {:?}", self.ssl_mode))?;
        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
            .ssl_mode(ssl_mode))
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreKind,
    pub database: DatabaseConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8081,
            },
            store: StoreKind::Postgres,
            database: DatabaseConfig {
                url: None,
                host: "localhost".into(),
                port: 5432,
                user: "postgres".into(),
                password: "postgres".into(),
                name: "user_management".into(),
                ssl_mode: "disable".into(),
                max_connections: 10,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, falling back to defaults for
    /// missing keys and for numbers that do not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let d = Self::default();
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);

        let store = match lookup("USER_STORE") {
            Some(v) => v.parse()?,
            None => d.store,
        };

        Ok(Self {
            server: ServerConfig {
                host: text("SERVER_HOST", d.server.host),
                port: parse_or(lookup("HTTP_PORT"), d.server.port),
            },
            store,
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
                host: text("DB_HOST", d.database.host),
                port: parse_or(lookup("DB_PORT"), d.database.port),
                user: text("DB_USER", d.database.user),
                password: text("DB_PASSWORD", d.database.password),
                name: text("DB_NAME", d.database.name),
                ssl_mode: text("DB_SSLMODE", d.database.ssl_mode),
                max_connections: parse_or(
                    lookup("DB_MAX_CONNECTIONS"),
                    d.database.max_connections,
                ),
            },
        })
    }
}
