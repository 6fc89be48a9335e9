use crate::{
    config::Config,
    error::AuthenticationError,
    types::{AuthorizationRequest, Grant, TokenErrorResponse, TokenResponse, TokenSet},
};
use base64::Engine;
use chrono::Utc;
use rand::Rng;
use reqwest::{header, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Bytes of entropy in each generated `state`.
pub const STATE_BYTES: usize = 32;

// Generate random state parameter
pub fn generate_state() -> String {
    let random_bytes: Vec<u8> = (0..STATE_BYTES)
        .map(|_| rand::thread_rng().gen())
        .collect();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Drives the authorization-code grant against the Xero identity server.
#[derive(Clone)]
pub struct TokenManager {
    config: Arc<Config>,
    http_client: reqwest::Client,
}

impl TokenManager {
    pub fn new(config: Arc<Config>, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn build_authorization_url(&self) -> AuthorizationRequest {
        let credentials = &self.config.credentials;
        let state = generate_state();
        let scope = credentials.scope();

        let auth_params = [
            ("response_type", "code"),
            ("client_id", credentials.client_id.as_str()),
            ("redirect_uri", credentials.redirect_uri.as_str()),
            ("scope", scope.as_str()),
            ("state", state.as_str()),
        ];

        // Only &str pairs go in here, which always encode.
        let query = serde_urlencoded::to_string(auth_params).unwrap_or_default();
        let url = format!("{}?{}", self.config.authorize_url, query);

        debug!(
            "Auth params: client_id={}, redirect_uri={}, scope={}",
            credentials.client_id, credentials.redirect_uri, scope
        );

        AuthorizationRequest { url, state }
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, AuthenticationError> {
        self.request_tokens(Grant::AuthorizationCode {
            code: code.to_string(),
            redirect_uri: self.config.credentials.redirect_uri.clone(),
        })
        .await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthenticationError> {
        self.request_tokens(Grant::RefreshToken {
            refresh_token: refresh_token.to_string(),
        })
        .await
    }

    /// `Basic` credential for the token endpoint: `base64(client_id:client_secret)`.
    pub fn basic_auth_header(&self) -> String {
        let credentials = &self.config.credentials;
        let raw = format!("{}:{}", credentials.client_id, credentials.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }

    async fn request_tokens(&self, grant: Grant) -> Result<TokenSet, AuthenticationError> {
        let token_url = &self.config.token_url;
        debug!("Requesting {} grant at: {}", grant.name(), token_url);

        let response = self
            .http_client
            .post(token_url)
            .header(header::AUTHORIZATION, self.basic_auth_header())
            .header(header::ACCEPT, "application/json")
            .form(&grant)
            .send()
            .await
            .map_err(|e| {
                error!("Token request failed to send: {}", e);
                AuthenticationError::NetworkFailure(e)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(AuthenticationError::NetworkFailure)?;

        if status != StatusCode::OK {
            error!("Token request failed with status {}: {}", status, body);
            return Err(classify_failure(status, body));
        }

        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthenticationError::MalformedResponse(e.to_string()))?;

        let tokens = TokenSet::from_response(token_response, Utc::now())?;
        info!(
            "Obtained {} token via {} grant, expires at {}",
            tokens.token_type,
            grant.name(),
            tokens.expires_at
        );
        Ok(tokens)
    }
}

fn classify_failure(status: StatusCode, body: String) -> AuthenticationError {
    if status == StatusCode::BAD_REQUEST {
        if let Ok(oauth_error) = serde_json::from_str::<TokenErrorResponse>(&body) {
            if oauth_error.error == "invalid_grant" {
                debug!(
                    "invalid_grant: {}",
                    oauth_error.error_description.as_deref().unwrap_or("")
                );
                return AuthenticationError::InvalidGrant { body };
            }
        }
    }
    AuthenticationError::UpstreamError {
        status: status.as_u16(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use url::Url;

    fn manager() -> TokenManager {
        let config = Config::new("abc", "shh", "https://app/cb");
        TokenManager::new(Arc::new(config), reqwest::Client::new())
    }

    #[test]
    fn state_has_32_bytes_of_entropy() {
        let state = generate_state();
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&state)
            .unwrap();
        assert_eq!(decoded.len(), STATE_BYTES);
    }

    #[test]
    fn authorization_url_carries_exact_parameters() {
        let request = manager().build_authorization_url();
        let url = Url::parse(&request.url).unwrap();
        assert_eq!(url.host_str(), Some("login.xero.com"));
        assert_eq!(url.path(), "/identity/connect/authorize");

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params.len(), 5);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "abc");
        assert_eq!(params["redirect_uri"], "https://app/cb");
        assert_eq!(
            params["scope"],
            "offline_access accounting.transactions.read accounting.contacts.read"
        );
        assert_eq!(params["state"], request.state);
    }

    #[test]
    fn states_are_unique_per_call() {
        let manager = manager();
        let states: HashSet<String> = (0..100)
            .map(|_| manager.build_authorization_url().state)
            .collect();
        assert_eq!(states.len(), 100);
    }

    #[test]
    fn basic_auth_encodes_id_and_secret() {
        // base64("abc:shh")
        assert_eq!(manager().basic_auth_header(), "Basic YWJjOnNoaA==");
    }

    #[test]
    fn invalid_grant_is_classified() {
        let err = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant"}"#.to_string(),
        );
        assert!(matches!(err, AuthenticationError::InvalidGrant { .. }));

        let err = classify_failure(StatusCode::BAD_REQUEST, "nope".to_string());
        assert!(matches!(
            err,
            AuthenticationError::UpstreamError { status: 400, .. }
        ));
    }
}
