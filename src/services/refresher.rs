use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::db::models::{CredentialState, NewCredential, UpstreamCredential};
use crate::error::AppError;
use crate::store::Storage;
use crate::upstream::{TokenGrant, UpstreamProvider};

/// Credentials are treated as expired this long before the provider's deadline
pub const EXPIRY_SKEW_SECS: i64 = 60;

pub fn expires_at(now: i64, expires_in: i64) -> i64 {
  now + (expires_in - EXPIRY_SKEW_SECS).max(0)
}

/// Build the replacement credential for a refresh grant. The provider may
/// omit the refresh token, in which case the current one stays in use.
pub fn refreshed_credential(grant: TokenGrant, current_refresh_token: &str, now: i64) -> NewCredential {
  NewCredential {
    expires_at: expires_at(now, grant.expires_in),
    refresh_token: grant
      .refresh_token
      .filter(|t| !t.is_empty())
      .unwrap_or_else(|| current_refresh_token.to_string()),
    access_token: grant.access_token,
  }
}

/// Keeps each user's upstream access token valid.
///
/// Refreshes for the same user are serialized: whoever takes the per-user
/// lock second re-reads the credential and finds it already replaced.
pub struct CredentialRefresher {
  store: Arc<dyn Storage>,
  provider: Arc<dyn UpstreamProvider>,
  locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl CredentialRefresher {
  pub fn new(store: Arc<dyn Storage>, provider: Arc<dyn UpstreamProvider>) -> Self {
    Self {
      store,
      provider,
      locks: DashMap::new(),
    }
  }

  /// Current access token for the user, refreshing it first if it expired
  pub async fn ensure_fresh(&self, user_id: i64, cancel: &CancellationToken) -> Result<String, AppError> {
    self.ensure_fresh_at(user_id, Utc::now().timestamp(), cancel).await
  }

  pub async fn ensure_fresh_at(&self, user_id: i64, now: i64, cancel: &CancellationToken) -> Result<String, AppError> {
    let credential = self.load(user_id).await?;
    if credential.state_at(now) == CredentialState::Valid {
      return Ok(credential.access_token);
    }

    let lock = self.locks.entry(user_id).or_default().clone();
    let _guard = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(AppError::Cancelled),
      guard = lock.lock() => guard,
    };

    let credential = self.load(user_id).await?;
    if credential.state_at(now) == CredentialState::Valid {
      tracing::debug!("Credential for user {} was refreshed concurrently", user_id);
      return Ok(credential.access_token);
    }

    let grant = self
      .provider
      .refresh(&credential.refresh_token, cancel)
      .await
      .map_err(|e| {
        tracing::warn!("Refreshing upstream credential for user {} failed: {}", user_id, e);
        AppError::upstream_refresh(e)
      })?;

    let replacement = refreshed_credential(grant, &credential.refresh_token, now);
    // On failure the previous credential stays authoritative
    let saved = self.store.replace_credential(user_id, &replacement, None).await?;

    tracing::info!("Refreshed upstream credential for user {}", user_id);
    Ok(saved.access_token)
  }

  async fn load(&self, user_id: i64) -> Result<UpstreamCredential, AppError> {
    self
      .store
      .find_credential(user_id)
      .await?
      .ok_or_else(|| AppError::Authentication("no upstream account connected".to_string()))
  }
}
