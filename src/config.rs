use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_AUTHORIZE_URL: &str = "https://login.xero.com/identity/connect/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://identity.xero.com/connect/token";
pub const DEFAULT_CONNECTIONS_URL: &str = "https://api.xero.com/connections";
pub const DEFAULT_API_BASE_URL: &str = "https://api.xero.com/api.xro/2.0";
pub const DEFAULT_SCOPES: &str =
    "offline_access accounting.transactions.read accounting.contacts.read";

/// OAuth2 client registration for the Xero app.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl Credentials {
    /// Scopes joined the way the authorize endpoint expects them.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub credentials: Credentials,
    pub authorize_url: String,
    pub token_url: String,
    pub connections_url: String,
    pub api_base_url: String,
    pub frontend_url: String,
    pub http_timeout: Duration,
    pub state_ttl: Duration,
    pub session_ttl: Duration,
    pub session_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let redirect_uri = required("XERO_REDIRECT_URI")?;
        Url::parse(&redirect_uri).context("Invalid XERO_REDIRECT_URI")?;

        Ok(Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .context("Invalid PORT")?,

            credentials: Credentials {
                client_id: required("XERO_CLIENT_ID")?,
                client_secret: required("XERO_CLIENT_SECRET")?,
                redirect_uri,
                scopes: parse_scopes(
                    &std::env::var("XERO_SCOPES").unwrap_or_else(|_| DEFAULT_SCOPES.to_string()),
                ),
            },

            authorize_url: std::env::var("XERO_AUTHORIZE_URL")
                .unwrap_or_else(|_| DEFAULT_AUTHORIZE_URL.to_string()),

            token_url: std::env::var("XERO_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),

            connections_url: std::env::var("XERO_CONNECTIONS_URL")
                .unwrap_or_else(|_| DEFAULT_CONNECTIONS_URL.to_string()),

            api_base_url: std::env::var("XERO_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),

            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "https://ledger-match.vercel.app".to_string()),

            http_timeout: Duration::from_secs(
                std::env::var("XERO_HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid XERO_HTTP_TIMEOUT_SECS")?,
            ),

            state_ttl: Duration::from_secs(
                std::env::var("XERO_STATE_TTL_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .context("Invalid XERO_STATE_TTL_SECS")?,
            ),

            session_ttl: Duration::from_secs(
                std::env::var("XERO_SESSION_TTL_SECS")
                    .unwrap_or_else(|_| "43200".to_string())
                    .parse()
                    .context("Invalid XERO_SESSION_TTL_SECS")?,
            ),

            session_capacity: std::env::var("XERO_SESSION_CAPACITY")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .context("Invalid XERO_SESSION_CAPACITY")?,
        })
    }

    /// Configuration pointing at the real Xero endpoints with the given app credentials.
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            port: 10000,
            credentials: Credentials {
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                redirect_uri: redirect_uri.to_string(),
                scopes: parse_scopes(DEFAULT_SCOPES),
            },
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            connections_url: DEFAULT_CONNECTIONS_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            frontend_url: "https://ledger-match.vercel.app".to_string(),
            http_timeout: Duration::from_secs(30),
            state_ttl: Duration::from_secs(600),
            session_ttl: Duration::from_secs(43200),
            session_capacity: 10_000,
        }
    }

    pub fn server_address(&self) -> SocketAddr {
        ([0, 0, 0, 0], self.port).into()
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{} must be set", name))
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
