use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::middleware::identity_headers;
use crate::auth::session_cookie;
use crate::error::AppError;
use crate::services::users::{LoginRequest, SignupRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    /// Where the client sends the user to connect their upstream account
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<SignupResponse>, AppError> {
    let url = state.users.signup(&req).await?;
    Ok(Json(SignupResponse { url }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<LoginResponse>), AppError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let session = state.users.login(&req, &cancel).await?;

    let mut headers = HeaderMap::new();
    let cookie = HeaderValue::from_str(&session_cookie(&session.token))
        .map_err(|e| AppError::Internal(format!("Invalid session cookie: {}", e)))?;
    headers.insert(header::SET_COOKIE, cookie);
    identity_headers(&mut headers, session.user_id, session.upstream_token.as_deref());

    tracing::info!("User {} logged in", session.user_id);

    Ok((
        headers,
        Json(LoginResponse {
            token: session.token,
            user_id: session.user_id,
        }),
    ))
}

/// Redirect target of the provider's authorization page
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, AppError> {
    let (Some(code), Some(handshake)) = (query.code, query.state) else {
        return Err(AppError::Validation("Failed to read query params".to_string()));
    };
    if code.is_empty() || handshake.is_empty() {
        return Err(AppError::Validation("Failed to read query params".to_string()));
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    state.handshakes.complete(&handshake, &code, &cancel).await?;

    Ok(Redirect::temporary(&state.config.frontend_url))
}
