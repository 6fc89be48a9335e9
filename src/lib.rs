use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

pub mod accounting;
pub mod auth;
pub mod config;
pub mod error;
pub mod flow;
pub mod session;
pub mod token;
pub mod types;
pub mod xero;

use crate::{config::Config, session::SessionStore, token::TokenManager, xero::InvoiceClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub tokens: TokenManager,
    pub invoices: InvoiceClient,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        // Shared by every upstream call so each one is bounded by the same timeout
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("xero-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            sessions: Arc::new(SessionStore::new(
                config.state_ttl,
                config.session_ttl,
                config.session_capacity,
            )),
            tokens: TokenManager::new(config.clone(), http_client.clone()),
            invoices: InvoiceClient::new(&config, http_client),
            config,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let timeout = request_timeout(&state.config);

    Router::new()
        .route("/xero/auth/url", get(auth::authorization_url))
        .route("/xero/auth/callback", post(auth::callback))
        .route("/xero/auth/refresh", post(auth::refresh))
        .route("/xero/auth/status", get(auth::status))
        .route("/xero/customers", get(accounting::customers))
        .route(
            "/xero/customer/:customer_id/invoices",
            get(accounting::customer_invoices),
        )
        .route("/health", get(health_check))
        .route("/", get(root_handler))
        .layer(cors_layer(&state.config))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Upper bound for a whole request: a tenant lookup and a fetch, each bounded by
/// `http_timeout`, plus headroom for the error response.
pub fn request_timeout(config: &Config) -> Duration {
    config.http_timeout * UPSTREAM_CALLS_PER_REQUEST + Duration::from_secs(5)
}

const UPSTREAM_CALLS_PER_REQUEST: u32 = 2;

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .allow_credentials(true);

    match HeaderValue::from_str(&config.frontend_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!("Ignoring invalid FRONTEND_URL {}: {}", config.frontend_url, e);
            layer
        }
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn root_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "service": "Xero Bridge",
        "status": "running",
        "endpoints": {
            "authorization_url": "/xero/auth/url",
            "callback": "/xero/auth/callback",
            "refresh": "/xero/auth/refresh",
            "status": "/xero/auth/status",
            "customers": "/xero/customers",
            "invoices": "/xero/customer/{customer_id}/invoices",
            "health": "/health"
        }
    }))
}
