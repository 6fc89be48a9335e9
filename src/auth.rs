use crate::{
    error::{AppError, AuthenticationError, InvoiceError, Result},
    flow::AuthPhase,
    session::SessionStore,
    types::{
        AuthUrlResponse, CallbackParams, RefreshRequest, StatusQuery, StatusResponse,
        TokenPayload,
    },
    AppState,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_extra::{
    extract::{
        cookie::{Cookie, CookieJar, SameSite},
        WithRejection,
    },
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tracing::{debug, error, info, warn};

pub const SESSION_COOKIE_NAME: &str = "xero_bridge_session";

fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
}

// Issue an authorization URL and remember its state for this browser session
pub async fn authorization_url(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    let request = state.tokens.build_authorization_url();

    let existing = session_id(&jar)
        .filter(|id| match state.sessions.begin_authorization(id, &request.state) {
            Ok(()) => true,
            Err(e) => {
                warn!("Replacing session {}: {}", id, e);
                false
            }
        });
    let session_id = match existing {
        Some(id) => id,
        None => {
            let id = SessionStore::generate_session_id();
            state
                .sessions
                .begin_authorization(&id, &request.state)
                .map_err(AuthenticationError::from)?;
            id
        }
    };

    info!("Issued Xero authorization URL for session {}", session_id);

    let jar = jar.add(session_cookie(&state, session_id));
    Ok((
        jar,
        Json(AuthUrlResponse {
            authorization_url: request.url,
        }),
    ))
}

// Exchange the authorization code returned by Xero
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Query(params), _): WithRejection<Query<CallbackParams>, AppError>,
) -> Result<impl IntoResponse> {
    debug!(
        "OAuth callback received: code={}, state={}, error={:?}",
        params.code.is_some(),
        params.state.is_some(),
        params.error
    );

    let session_id = session_id(&jar).unwrap_or_default();

    if let Some(denied) = params.error {
        state.sessions.fail(&session_id);
        return Err(AuthenticationError::AuthorizationDenied(denied).into());
    }

    state
        .sessions
        .receive_code(&session_id, params.state.as_deref())?;

    let Some(code) = params.code else {
        state.sessions.fail(&session_id);
        return Err(AuthenticationError::MissingCode.into());
    };

    match state.tokens.exchange_code(&code).await {
        Ok(tokens) => {
            state
                .sessions
                .tokens_issued(&session_id, tokens.expires_at)
                .map_err(AuthenticationError::from)?;
            info!("Xero authorization complete for session {}", session_id);
            Ok(Json(TokenPayload::from(tokens)))
        }
        Err(e) => {
            state.sessions.fail(&session_id);
            error!("Code exchange failed (retryable: {})", e.is_retryable());
            Err(e.into())
        }
    }
}

// Refresh an access token that is about to expire
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<RefreshRequest>, AppError>,
) -> Result<impl IntoResponse> {
    let session_id = session_id(&jar).unwrap_or_default();
    state
        .sessions
        .begin_refresh(&session_id)
        .map_err(AuthenticationError::from)?;

    match state.tokens.refresh_token(&payload.refresh_token).await {
        Ok(tokens) => {
            state
                .sessions
                .tokens_issued(&session_id, tokens.expires_at)
                .map_err(AuthenticationError::from)?;
            Ok(Json(TokenPayload::from(tokens)))
        }
        Err(e) => {
            state.sessions.fail(&session_id);
            error!("Token refresh failed (retryable: {})", e.is_retryable());
            Err(e.into())
        }
    }
}

// Check an access token against Xero, reporting the connected organisations
pub async fn status(
    State(state): State<AppState>,
    jar: CookieJar,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    WithRejection(Query(query), _): WithRejection<Query<StatusQuery>, AppError>,
) -> Result<(StatusCode, Json<StatusResponse>)> {
    let phase = session_id(&jar)
        .map(|id| state.sessions.phase(&id))
        .unwrap_or(AuthPhase::Unauthenticated);

    let unauthenticated = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(StatusResponse {
                authenticated: false,
                phase,
                tenants: Vec::new(),
            }),
        )
    };

    let token = bearer
        .map(|TypedHeader(auth)| auth.token().to_string())
        .or(query.token);
    let Some(token) = token else {
        return Ok(unauthenticated());
    };

    match state.invoices.connections(&token).await {
        Ok(tenants) => Ok((
            StatusCode::OK,
            Json(StatusResponse {
                authenticated: true,
                phase,
                tenants,
            }),
        )),
        Err(InvoiceError::Unauthorized { .. }) => {
            debug!("Status check with a rejected token");
            Ok(unauthenticated())
        }
        Err(e) => Err(e.into()),
    }
}

fn session_cookie(state: &AppState, session_id: String) -> Cookie<'static> {
    // Cross-site browsers only send SameSite=None cookies over https.
    let secure = state
        .config
        .credentials
        .redirect_uri
        .starts_with("https://");

    Cookie::build((SESSION_COOKIE_NAME, session_id))
        .http_only(true)
        .secure(secure)
        .same_site(if secure { SameSite::None } else { SameSite::Lax })
        .path("/")
        .build()
}
