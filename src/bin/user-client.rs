//! Command-line client for the user management HTTP API.
//!
//! Subcommands map one-to-one onto the `/api/v1/users` routes:
//! - `create`: POST /users
//! - `get`: GET /users/:id
//! - `update`: PATCH /users/:id (only the flags given are sent)
//! - `delete`: DELETE /users/:id
//! - `list`: GET /users?page=&page_size=

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Manage users through the user management API
#[derive(Debug, Parser)]
#[command(name = "user-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the API (defaults to SERVER_HOST and HTTP_PORT)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new user
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        fullname: String,
    },

    /// Fetch a user by id
    Get {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
    },

    /// Change some fields of a user
    Update {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        fullname: Option<String>,
    },

    /// Delete a user by id
    Delete {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        id: i64,
    },

    /// List one page of users
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long = "pagesize", default_value_t = 10)]
        page_size: i64,
    },
}

impl Command {
    /// Method, path and optional JSON body for this command.
    fn request(&self) -> (Method, String, Option<Value>) {
        match self {
            Command::Create {
                username,
                email,
                password,
                fullname,
            } => (
                Method::POST,
                "/api/v1/users".into(),
                Some(json!({
                    "username": username,
                    "email": email,
                    "password": password,
                    "full_name": fullname,
                })),
            ),
            Command::Get { id } => (Method::GET, format!("/api/v1/users/{id}"), None),
            Command::Update {
                id,
                username,
                email,
                password,
                fullname,
            } => {
                let mut body = Map::new();
                for (key, value) in [
                    ("username", username),
                    ("email", email),
                    ("password", password),
                    ("full_name", fullname),
                ] {
                    if let Some(value) = value {
                        body.insert(key.into(), Value::String(value.clone()));
                    }
                }
                (
                    Method::PATCH,
                    format!("/api/v1/users/{id}"),
                    Some(Value::Object(body)),
                )
            }
            Command::Delete { id } => (Method::DELETE, format!("/api/v1/users/{id}"), None),
            Command::List { page, page_size } => (
                Method::GET,
                format!("/api/v1/users?page={page}&page_size={page_size}"),
                None,
            ),
        }
    }
}

/// Server base URL from the same variables the server listens on.
fn base_url(lookup: impl Fn(&str) -> Option<String>) -> String {
    let host = lookup("SERVER_HOST")
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".into());
    // 0.0.0.0 is a listen address, not a dialable one
    let host = if host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        host
    };
    let port = lookup("HTTP_PORT")
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8081);
    format!("http://{host}:{port}")
}

async fn send(client: &Client, base: &str, command: &Command) -> anyhow::Result<Value> {
    let (method, path, body) = command.request();
    let url = format!("{}{}", base.trim_end_matches('/'), path);
    debug!(%method, %url, "sending request");

    let mut req = client.request(method.clone(), &url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let res = req
        .send()
        .await
        .with_context(|| format!("{method} {url}"))?;

    let status = res.status();
    let text = res.text().await.context("read response body")?;
    if !status.is_success() {
        bail!("{method} {url} failed with {status}: {text}");
    }
    info!(%status, "request succeeded");
    serde_json::from_str(&text).with_context(|| format!("decode response from {url}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "user_client=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base = cli
        .server
        .clone()
        .unwrap_or_else(|| base_url(|key| std::env::var(key).ok()));

    let client = Client::builder()
        .timeout(CALL_TIMEOUT)
        .build()
        .context("build http client")?;

    let body = send(&client, &base, &cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
