//! Client side of the streaming provider: OAuth grants plus the handful of
//! playlist, library and player endpoints the app uses.

#[cfg(test)]
pub mod fake;
mod retry;
pub mod spotify;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub use retry::RetryPolicy;
pub use spotify::SpotifyClient;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
  #[error("provider responded {status}: {body}")]
  Http { status: u16, body: String },

  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("request timed out")]
  Timeout,

  #[error("malformed provider response: {0}")]
  Malformed(String),

  #[error("request cancelled")]
  Cancelled,
}

/// Token endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
  pub access_token: String,
  /// Omitted by the provider on most refresh grants
  #[serde(default)]
  pub refresh_token: Option<String>,
  /// Seconds
  pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProfile {
  pub id: String,
  pub display_name: Option<String>,
  pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
  pub id: String,
  pub name: String,
  /// Public web link
  pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistItem {
  pub name: String,
  pub artists: Vec<String>,
  pub uri: String,
  pub image_url: Option<String>,
}

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
  /// Authorization page the user is sent to, carrying `state`
  fn authorize_url(&self, state: &str) -> String;

  async fn exchange_code(&self, code: &str, cancel: &CancellationToken) -> Result<TokenGrant, UpstreamError>;

  async fn refresh(&self, refresh_token: &str, cancel: &CancellationToken) -> Result<TokenGrant, UpstreamError>;

  async fn current_user(&self, access_token: &str, cancel: &CancellationToken) -> Result<UpstreamProfile, UpstreamError>;

  async fn create_playlist(
    &self,
    access_token: &str,
    upstream_user_id: &str,
    name: &str,
    description: &str,
    cancel: &CancellationToken,
  ) -> Result<Playlist, UpstreamError>;

  async fn get_playlist(
    &self,
    access_token: &str,
    playlist_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Playlist, UpstreamError>;

  /// Every item of the playlist, following pagination
  async fn get_playlist_items(
    &self,
    access_token: &str,
    playlist_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<PlaylistItem>, UpstreamError>;

  async fn save_tracks(&self, access_token: &str, ids: &[String], cancel: &CancellationToken) -> Result<(), UpstreamError>;

  async fn remove_saved_tracks(&self, access_token: &str, ids: &[String], cancel: &CancellationToken) -> Result<(), UpstreamError>;

  async fn play(
    &self,
    access_token: &str,
    device_id: Option<&str>,
    uris: &[String],
    cancel: &CancellationToken,
  ) -> Result<(), UpstreamError>;

  async fn transfer_playback(&self, access_token: &str, device_id: &str, cancel: &CancellationToken) -> Result<(), UpstreamError>;
}

/// Provider id from a `spotify:track:<id>` URI
pub fn track_id_from_uri(uri: &str) -> Option<&str> {
  let mut parts = uri.split(':');
  match (parts.next(), parts.next(), parts.next(), parts.next()) {
    (Some(_), Some("track"), Some(id), None) if !id.is_empty() => Some(id),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn track_ids_from_uris() {
    assert_eq!(track_id_from_uri("spotify:track:4uLU6hMCjMI75M1A2tKUQC"), Some("4uLU6hMCjMI75M1A2tKUQC"));
    assert_eq!(track_id_from_uri("spotify:episode:abc"), None);
    assert_eq!(track_id_from_uri("spotify:track:"), None);
    assert_eq!(track_id_from_uri("garbage"), None);
  }

  #[test]
  fn refresh_grant_without_refresh_token() {
    let grant: TokenGrant =
      serde_json::from_str(r#"{"access_token":"a","token_type":"Bearer","expires_in":3600,"scope":""}"#).unwrap();
    assert_eq!(grant.refresh_token, None);
    assert_eq!(grant.expires_in, 3600);
  }
}
