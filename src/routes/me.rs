use axum::{extract::State, Extension, Json};

use super::middleware::AuthUser;
use crate::error::AppError;
use crate::services::users::{Profile, UpdateMeRequest};
use crate::AppState;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(state.users.me(&auth.user).await?))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<UpdateMeRequest>,
) -> Result<Json<Profile>, AppError> {
    let profile = state.users.update_me(&auth.user, &req).await?;
    tracing::info!("User {} updated their profile", auth.user.id);
    Ok(Json(profile))
}

pub async fn genres(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.users.genres().await?))
}
