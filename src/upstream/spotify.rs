use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{Playlist, PlaylistItem, RetryPolicy, TokenGrant, UpstreamError, UpstreamProfile, UpstreamProvider};
use crate::config::{Config, SpotifyConfig};

const ACCOUNTS_URL: &str = "https://accounts.spotify.com";
const API_URL: &str = "https://api.spotify.com/v1";
const PAGE_SIZE: u32 = 100;

/// Spotify Web API client. Every request runs under a per-attempt timeout,
/// is retried according to the [`RetryPolicy`] and aborts as soon as the
/// caller's cancellation token fires.
pub struct SpotifyClient {
  http: Client,
  spotify: SpotifyConfig,
  authorize_endpoint: Url,
  token_endpoint: String,
  api_url: String,
  timeout: Duration,
  retry: RetryPolicy,
}

struct Failure {
  error: UpstreamError,
  retry_after: Option<Duration>,
}

impl From<reqwest::Error> for Failure {
  fn from(error: reqwest::Error) -> Self {
    Self { error: UpstreamError::Transport(error), retry_after: None }
  }
}

async fn send(request: RequestBuilder) -> Result<String, Failure> {
  let response = request.send().await?;
  let status = response.status();
  let retry_after = response
    .headers()
    .get(RETRY_AFTER)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.trim().parse::<u64>().ok())
    .map(Duration::from_secs);
  let body = response.text().await?;

  if status.is_success() {
    Ok(body)
  } else {
    Err(Failure {
      error: UpstreamError::Http { status: status.as_u16(), body },
      retry_after,
    })
  }
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, UpstreamError> {
  serde_json::from_str(body).map_err(|e| UpstreamError::Malformed(e.to_string()))
}

#[derive(Deserialize)]
struct Image {
  url: String,
}

#[derive(Deserialize)]
struct MeResponse {
  id: String,
  display_name: Option<String>,
  #[serde(default)]
  images: Vec<Image>,
}

#[derive(Deserialize)]
struct PlaylistResponse {
  id: String,
  name: String,
  #[serde(default)]
  external_urls: HashMap<String, String>,
}

impl From<PlaylistResponse> for Playlist {
  fn from(p: PlaylistResponse) -> Self {
    let link = p
      .external_urls
      .get("spotify")
      .cloned()
      .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{}", p.id));
    Playlist { id: p.id, name: p.name, link }
  }
}

#[derive(Deserialize)]
struct TracksPage {
  items: Vec<TrackEntry>,
  next: Option<String>,
}

#[derive(Deserialize)]
struct TrackEntry {
  // null for tracks removed from the catalogue
  track: Option<TrackObject>,
}

#[derive(Deserialize)]
struct TrackObject {
  name: String,
  uri: String,
  #[serde(default)]
  artists: Vec<ArtistObject>,
  album: Option<AlbumObject>,
}

#[derive(Deserialize)]
struct ArtistObject {
  name: String,
}

#[derive(Deserialize)]
struct AlbumObject {
  #[serde(default)]
  images: Vec<Image>,
}

impl From<TrackObject> for PlaylistItem {
  fn from(t: TrackObject) -> Self {
    PlaylistItem {
      name: t.name,
      artists: t.artists.into_iter().map(|a| a.name).collect(),
      uri: t.uri,
      image_url: t.album.and_then(|a| a.images.into_iter().next()).map(|i| i.url),
    }
  }
}

impl SpotifyClient {
  pub fn new(config: &Config) -> Result<Self, UpstreamError> {
    Self::with_endpoints(config, ACCOUNTS_URL, API_URL)
  }

  pub fn with_endpoints(config: &Config, accounts_url: &str, api_url: &str) -> Result<Self, UpstreamError> {
    let authorize_endpoint = Url::parse(&format!("{}/authorize", accounts_url))
      .map_err(|e| UpstreamError::Malformed(format!("accounts url: {}", e)))?;

    Ok(Self {
      http: Client::builder().build()?,
      spotify: config.spotify.clone(),
      authorize_endpoint,
      token_endpoint: format!("{}/api/token", accounts_url),
      api_url: api_url.trim_end_matches('/').to_string(),
      timeout: config.upstream_timeout,
      retry: RetryPolicy::with_max_retries(config.upstream_max_retries),
    })
  }

  async fn execute<F>(&self, build: F, idempotent: bool, cancel: &CancellationToken) -> Result<String, UpstreamError>
  where
    F: Fn(&Client) -> RequestBuilder + Send + Sync,
  {
    let mut attempt = 0;
    loop {
      let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
        result = tokio::time::timeout(self.timeout, send(build(&self.http))) => {
          result.unwrap_or_else(|_| Err(Failure { error: UpstreamError::Timeout, retry_after: None }))
        }
      };

      let failure = match outcome {
        Ok(body) => return Ok(body),
        Err(failure) => failure,
      };

      if attempt >= self.retry.max_retries || !self.retry.should_retry(&failure.error, idempotent) {
        return Err(failure.error);
      }

      let delay = self.retry.delay(attempt, failure.retry_after);
      tracing::debug!("Upstream request failed ({}), retrying in {:?}", failure.error, delay);
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
        _ = tokio::time::sleep(delay) => {}
      }
      attempt += 1;
    }
  }

  async fn get<T: DeserializeOwned>(&self, url: &str, access_token: &str, cancel: &CancellationToken) -> Result<T, UpstreamError> {
    let body = self
      .execute(|http| http.get(url).bearer_auth(access_token), true, cancel)
      .await?;
    parse(&body)
  }

  async fn token(&self, form: &[(&str, &str)], idempotent: bool, cancel: &CancellationToken) -> Result<TokenGrant, UpstreamError> {
    let body = self
      .execute(
        |http| {
          http
            .post(&self.token_endpoint)
            .basic_auth(&self.spotify.client_id, Some(&self.spotify.client_secret))
            .form(form)
        },
        idempotent,
        cancel,
      )
      .await?;
    parse(&body)
  }
}

#[async_trait]
impl UpstreamProvider for SpotifyClient {
  fn authorize_url(&self, state: &str) -> String {
    let mut url = self.authorize_endpoint.clone();
    url
      .query_pairs_mut()
      .append_pair("response_type", "code")
      .append_pair("client_id", &self.spotify.client_id)
      .append_pair("scope", &self.spotify.scopes.join(" "))
      .append_pair("redirect_uri", &self.spotify.redirect_url)
      .append_pair("state", state);
    url.into()
  }

  async fn exchange_code(&self, code: &str, cancel: &CancellationToken) -> Result<TokenGrant, UpstreamError> {
    let form = [
      ("grant_type", "authorization_code"),
      ("code", code),
      ("redirect_uri", self.spotify.redirect_url.as_str()),
    ];
    // authorization codes are single use
    self.token(&form, false, cancel).await
  }

  async fn refresh(&self, refresh_token: &str, cancel: &CancellationToken) -> Result<TokenGrant, UpstreamError> {
    let form = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
    self.token(&form, true, cancel).await
  }

  async fn current_user(&self, access_token: &str, cancel: &CancellationToken) -> Result<UpstreamProfile, UpstreamError> {
    let me: MeResponse = self.get(&format!("{}/me", self.api_url), access_token, cancel).await?;
    Ok(UpstreamProfile {
      id: me.id,
      display_name: me.display_name,
      image_url: me.images.into_iter().next().map(|i| i.url),
    })
  }

  async fn create_playlist(
    &self,
    access_token: &str,
    upstream_user_id: &str,
    name: &str,
    description: &str,
    cancel: &CancellationToken,
  ) -> Result<Playlist, UpstreamError> {
    let url = format!("{}/users/{}/playlists", self.api_url, upstream_user_id);
    let payload = json!({
      "name": name,
      "description": description,
      "public": false,
      "collaborative": false,
    });
    let body = self
      .execute(|http| http.post(&url).bearer_auth(access_token).json(&payload), false, cancel)
      .await?;
    Ok(parse::<PlaylistResponse>(&body)?.into())
  }

  async fn get_playlist(&self, access_token: &str, playlist_id: &str, cancel: &CancellationToken) -> Result<Playlist, UpstreamError> {
    let url = format!("{}/playlists/{}?fields=id,name,external_urls", self.api_url, playlist_id);
    let playlist: PlaylistResponse = self.get(&url, access_token, cancel).await?;
    Ok(playlist.into())
  }

  async fn get_playlist_items(
    &self,
    access_token: &str,
    playlist_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<PlaylistItem>, UpstreamError> {
    let mut items = Vec::new();
    let mut next = Some(format!("{}/playlists/{}/tracks?limit={}", self.api_url, playlist_id, PAGE_SIZE));

    while let Some(url) = next {
      let page: TracksPage = self.get(&url, access_token, cancel).await?;
      items.extend(page.items.into_iter().filter_map(|entry| entry.track).map(PlaylistItem::from));
      next = page.next;
    }

    Ok(items)
  }

  async fn save_tracks(&self, access_token: &str, ids: &[String], cancel: &CancellationToken) -> Result<(), UpstreamError> {
    let url = format!("{}/me/tracks", self.api_url);
    let ids = ids.join(",");
    self
      .execute(|http| http.put(&url).bearer_auth(access_token).query(&[("ids", &ids)]).json(&json!({})), true, cancel)
      .await?;
    Ok(())
  }

  async fn remove_saved_tracks(&self, access_token: &str, ids: &[String], cancel: &CancellationToken) -> Result<(), UpstreamError> {
    let url = format!("{}/me/tracks", self.api_url);
    let ids = ids.join(",");
    self
      .execute(|http| http.delete(&url).bearer_auth(access_token).query(&[("ids", &ids)]), true, cancel)
      .await?;
    Ok(())
  }

  async fn play(
    &self,
    access_token: &str,
    device_id: Option<&str>,
    uris: &[String],
    cancel: &CancellationToken,
  ) -> Result<(), UpstreamError> {
    let url = format!("{}/me/player/play", self.api_url);
    let payload = if uris.is_empty() { json!({}) } else { json!({ "uris": uris }) };
    self
      .execute(
        |http| {
          let request = http.put(&url).bearer_auth(access_token).json(&payload);
          match device_id {
            Some(device_id) => request.query(&[("device_id", device_id)]),
            None => request,
          }
        },
        true,
        cancel,
      )
      .await?;
    Ok(())
  }

  async fn transfer_playback(&self, access_token: &str, device_id: &str, cancel: &CancellationToken) -> Result<(), UpstreamError> {
    let url = format!("{}/me/player", self.api_url);
    let payload = json!({ "device_ids": [device_id], "play": false });
    self
      .execute(|http| http.put(&url).bearer_auth(access_token).json(&payload), true, cancel)
      .await?;
    Ok(())
  }
}
