use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::flow::FlowError;

/// Failures of the OAuth2 token endpoint round trip.
#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("Authorization grant rejected: {body}")]
    InvalidGrant { body: String },

    #[error("Token request failed with status {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Token request could not reach Xero: {0}")]
    NetworkFailure(#[source] reqwest::Error),

    #[error("Failed to parse token response: {0}")]
    MalformedResponse(String),

    #[error("Invalid OAuth state")]
    InvalidState,

    #[error("Missing authorization code")]
    MissingCode,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl AuthenticationError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthenticationError::NetworkFailure(_) => true,
            AuthenticationError::UpstreamError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum InvoiceError {
    #[error("Invalid customer id: {0}")]
    InvalidCustomerId(String),

    #[error("Xero rejected the access token: {body}")]
    Unauthorized { body: String },

    #[error("Xero request failed with status {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Xero request failed: {0}")]
    NetworkFailure(#[source] reqwest::Error),

    #[error("Failed to parse Xero response: {0}")]
    MalformedResponse(String),

    #[error("No Xero organisation is connected to this token")]
    NoTenant,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Invoice(#[from] InvoiceError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::Authentication(e) => {
                error!("Authentication failed: {}", e);
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Invoice(e) => {
                error!("Invoice fetch failed: {}", e);
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::InvalidRequest(e) => {
                debug!("Rejected request: {}", e);
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::InternalError(e) => {
                error!("Internal error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = Json(json!({
            "detail": detail
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
