use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{CredentialRefresher, HandshakeCoordinator};
use crate::auth::{hash_password, verify_password, SessionKeys};
use crate::db::models::User;
use crate::error::AppError;
use crate::store::Storage;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
  pub username: String,
  pub password: String,
  #[serde(default)]
  pub genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
  pub username: String,
  #[serde(default)]
  pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
  pub id: i64,
  pub username: String,
  pub genres: Vec<String>,
  pub profile_pic_url: Option<String>,
}

/// Outcome of a successful login
#[derive(Debug)]
pub struct Session {
  pub user_id: i64,
  pub token: String,
  /// Present when the user has connected an upstream account
  pub upstream_token: Option<String>,
}

/// Username: 3-20 letters, digits or underscores
pub fn validate_username(username: &str) -> Result<(), AppError> {
  let len = username.chars().count();
  if !(3..=20).contains(&len) {
    return Err(AppError::Validation("Username must be between 3 and 20 characters".to_string()));
  }
  if !username.chars().all(|c| c.is_alphanumeric() || c == '_') {
    return Err(AppError::Validation(
      "Username can only contain letters, numbers, and underscores".to_string(),
    ));
  }
  Ok(())
}

/// Password: 8-72 bytes, the bcrypt input limit
pub fn validate_password(password: &str) -> Result<(), AppError> {
  if password.len() < 8 {
    return Err(AppError::Validation("Password must be at least 8 characters".to_string()));
  }
  if password.len() > 72 {
    return Err(AppError::Validation("Password must be at most 72 characters".to_string()));
  }
  Ok(())
}

pub struct UserService {
  store: Arc<dyn Storage>,
  sessions: SessionKeys,
  handshakes: Arc<HandshakeCoordinator>,
  refresher: Arc<CredentialRefresher>,
}

impl UserService {
  pub fn new(
    store: Arc<dyn Storage>,
    sessions: SessionKeys,
    handshakes: Arc<HandshakeCoordinator>,
    refresher: Arc<CredentialRefresher>,
  ) -> Self {
    Self { store, sessions, handshakes, refresher }
  }

  /// Create the account and return the authorization URL that connects it
  /// to the upstream provider
  pub async fn signup(&self, req: &SignupRequest) -> Result<String, AppError> {
    validate_username(&req.username)?;
    validate_password(&req.password)?;

    let password_hash = hash_password(&req.password)
      .map_err(|e| AppError::Internal(format!("Password hashing error: {}", e)))?;
    let user = self.store.create_user(&req.username, &password_hash, &req.genres).await?;

    tracing::info!("Created user {} ({})", user.id, user.username);
    Ok(self.handshakes.begin(user.id).await)
  }

  pub async fn login(&self, req: &LoginRequest, cancel: &CancellationToken) -> Result<Session, AppError> {
    let invalid = || AppError::Authentication("Invalid username or password".to_string());

    let user = self
      .store
      .find_user_by_username(&req.username)
      .await?
      .ok_or_else(invalid)?;

    let valid = verify_password(&req.password, &user.password_hash)
      .map_err(|e| AppError::Internal(format!("Password verification error: {}", e)))?;
    if !valid {
      return Err(invalid());
    }

    let token = self.sessions.issue(user.id, Utc::now().timestamp())?;

    // The upstream token is a convenience for the client; a user who has not
    // finished the handshake yet can still log in.
    let upstream_token = match self.store.find_credential(user.id).await? {
      Some(_) => Some(self.refresher.ensure_fresh(user.id, cancel).await?),
      None => None,
    };

    Ok(Session { user_id: user.id, token, upstream_token })
  }

  pub async fn me(&self, user: &User) -> Result<Profile, AppError> {
    Ok(Profile {
      id: user.id,
      username: user.username.clone(),
      genres: self.store.genres_for_user(user.id).await?,
      profile_pic_url: user.profile_pic_url.clone(),
    })
  }

  pub async fn update_me(&self, user: &User, req: &UpdateMeRequest) -> Result<Profile, AppError> {
    validate_username(&req.username)?;
    let updated = self.store.update_profile(user.id, &req.username, &req.genres).await?;
    self.me(&updated).await
  }

  pub async fn genres(&self) -> Result<Vec<String>, AppError> {
    Ok(self.store.list_genres().await?.into_iter().map(|g| g.name).collect())
  }
}
