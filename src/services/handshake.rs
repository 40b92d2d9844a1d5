use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use rand::{rngs::OsRng, RngCore};
use tokio_util::sync::CancellationToken;

use super::refresher::expires_at;
use crate::db::models::{NewCredential, NewSet, ProfileUpdate, User};
use crate::error::AppError;
use crate::store::Storage;
use crate::upstream::{UpstreamError, UpstreamProvider};

const MAX_PENDING: u64 = 10_000;
const PLAYLIST_DESCRIPTION: &str = "Shared with Bangr";

/// Opaque, unguessable handshake state
fn new_state() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}

/// Correlates the provider's OAuth redirect with the user who started it.
///
/// Pending states live in a bounded TTL cache and are consumed on first use.
pub struct HandshakeCoordinator {
  states: Cache<String, i64>,
  store: Arc<dyn Storage>,
  provider: Arc<dyn UpstreamProvider>,
}

impl HandshakeCoordinator {
  pub fn new(store: Arc<dyn Storage>, provider: Arc<dyn UpstreamProvider>, ttl: Duration) -> Self {
    let states = Cache::builder()
      .max_capacity(MAX_PENDING)
      .time_to_live(ttl)
      .build();

    Self { states, store, provider }
  }

  /// Returns the authorization URL the user must visit
  pub async fn begin(&self, user_id: i64) -> String {
    let state = new_state();
    let url = self.provider.authorize_url(&state);
    self.states.insert(state, user_id).await;
    url
  }

  /// Exchange the code, provision the user's shared playlist and persist the
  /// credential together with the profile fields
  pub async fn complete(&self, state: &str, code: &str, cancel: &CancellationToken) -> Result<User, AppError> {
    let user_id = self.states.remove(state).await.ok_or(AppError::Correlation)?;
    let user = self
      .store
      .find_user(user_id)
      .await?
      .ok_or(AppError::NotFound("user"))?;

    let grant = self.provider.exchange_code(code, cancel).await.map_err(AppError::upstream)?;
    let refresh_token = grant.refresh_token.clone().ok_or_else(|| {
      AppError::upstream(UpstreamError::Malformed("authorization grant without refresh token".to_string()))
    })?;

    let profile = self
      .provider
      .current_user(&grant.access_token, cancel)
      .await
      .map_err(AppError::upstream)?;

    let playlist = self
      .provider
      .create_playlist(
        &grant.access_token,
        &profile.id,
        &format!("{}'s Bangr", user.username),
        PLAYLIST_DESCRIPTION,
        cancel,
      )
      .await
      .map_err(AppError::upstream)?;

    let credential = NewCredential {
      expires_at: expires_at(Utc::now().timestamp(), grant.expires_in),
      access_token: grant.access_token,
      refresh_token,
    };
    let update = ProfileUpdate {
      upstream_user_id: Some(profile.id),
      playlist_id: Some(playlist.id),
      profile_pic_url: profile.image_url,
      provisioned_set: Some(NewSet {
        name: playlist.name,
        link: playlist.link,
      }),
    };
    self.store.replace_credential(user.id, &credential, Some(&update)).await?;

    tracing::info!("User {} connected upstream account", user.id);

    self
      .store
      .find_user(user.id)
      .await?
      .ok_or(AppError::NotFound("user"))
  }
}
