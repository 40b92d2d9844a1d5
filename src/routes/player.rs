use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension,
};
use serde::Deserialize;

use super::middleware::AuthUser;
use crate::error::AppError;
use crate::services::player::{perform, PlayerAction};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PlayerQuery {
    pub action: String,
    pub device_id: Option<String>,
    /// Comma separated track URIs
    pub uris: Option<String>,
}

pub async fn player(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<PlayerQuery>,
) -> Result<StatusCode, AppError> {
    let action = PlayerAction::parse(&query.action, query.device_id.as_deref(), query.uris.as_deref())?;
    perform(state.provider.as_ref(), auth.upstream()?, &action, &auth.cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}
