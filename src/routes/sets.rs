use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

use super::middleware::AuthUser;
use crate::db::models::Set;
use crate::error::AppError;
use crate::services::sets::SetView;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LikeQuery {
    pub liked: bool,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub track_id: i64,
    pub liked: bool,
    /// False when the like already had the requested state
    pub changed: bool,
}

pub async fn get_sets(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<SetView>>, AppError> {
    let sets = state.sets.get_sets(auth.user.id, &Local::now()).await?;
    Ok(Json(sets))
}

pub async fn create_set(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<(StatusCode, Json<Set>), AppError> {
    let set = state
        .sets
        .create_set(&auth.user, auth.upstream()?, &auth.cancel)
        .await?;

    tracing::info!("User {} created set {}", auth.user.id, set.id);
    Ok((StatusCode::CREATED, Json(set)))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(track_id): Path<i64>,
    Query(query): Query<LikeQuery>,
) -> Result<Json<LikeResponse>, AppError> {
    let changed = state
        .sets
        .toggle_like(
            auth.user.id,
            track_id,
            query.liked,
            auth.upstream()?,
            Utc::now().timestamp(),
            &auth.cancel,
        )
        .await?;

    Ok(Json(LikeResponse {
        track_id,
        liked: query.liked,
        changed,
    }))
}
