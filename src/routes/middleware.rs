use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::auth::session_token;
use crate::db::models::User;
use crate::error::AppError;
use crate::AppState;

pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");
pub const UPSTREAM_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-upstream-token");

/// The authenticated caller, attached to the request by [`require_auth`]
#[derive(Clone)]
pub struct AuthUser {
    pub user: User,
    /// Fresh upstream access token, if the user connected an account
    pub upstream_token: Option<String>,
    /// Fires when the request is dropped
    pub cancel: CancellationToken,
}

impl AuthUser {
    /// Validate the session token, load the user and make sure their
    /// upstream credential is fresh
    pub async fn from_headers(
        state: &AppState,
        headers: &HeaderMap,
        cancel: CancellationToken,
    ) -> Result<Self, AppError> {
        let token = session_token(headers)
            .ok_or_else(|| AppError::Authentication("missing session token".to_string()))?;
        let claims = state.sessions.validate(&token, Utc::now().timestamp())?;

        let user = state
            .store
            .find_user(claims.user_id()?)
            .await?
            .ok_or_else(|| AppError::Authentication("unknown user".to_string()))?;

        let upstream_token = match state.store.find_credential(user.id).await? {
            Some(_) => Some(state.refresher.ensure_fresh(user.id, &cancel).await?),
            None => None,
        };

        Ok(Self { user, upstream_token, cancel })
    }

    /// Upstream access token, required by handlers that call the provider
    pub fn upstream(&self) -> Result<&str, AppError> {
        self.upstream_token
            .as_deref()
            .ok_or_else(|| AppError::Authentication("no upstream account connected".to_string()))
    }
}

/// Append the resolved user id and upstream token for client-side reuse
pub fn identity_headers(headers: &mut HeaderMap, user_id: i64, upstream_token: Option<&str>) {
    headers.insert(USER_ID_HEADER, HeaderValue::from(user_id));
    if let Some(value) = upstream_token.and_then(|t| HeaderValue::from_str(t).ok()) {
        headers.insert(UPSTREAM_TOKEN_HEADER, value);
    }
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Cancels in-flight upstream calls if the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let auth = AuthUser::from_headers(&state, request.headers(), cancel).await?;
    let user_id = auth.user.id;
    let upstream_token = auth.upstream_token.clone();
    request.extensions_mut().insert(auth);

    let mut response = next.run(request).await;
    identity_headers(response.headers_mut(), user_id, upstream_token.as_deref());
    Ok(response)
}
