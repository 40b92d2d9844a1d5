//! Scripted provider for service tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Playlist, PlaylistItem, TokenGrant, UpstreamError, UpstreamProfile, UpstreamProvider};

struct State {
  refresh: Result<TokenGrant, u16>,
  exchange: TokenGrant,
  profile: UpstreamProfile,
  playlists: HashMap<String, (Playlist, Vec<PlaylistItem>)>,
  failing_playlists: HashSet<String>,
  failing_items: HashSet<String>,
  calls: Vec<String>,
}

pub struct FakeProvider {
  state: Mutex<State>,
  refresh_delay: Mutex<Duration>,
  refresh_calls: AtomicUsize,
  created_playlists: AtomicUsize,
}

impl Default for FakeProvider {
  fn default() -> Self {
    Self::new()
  }
}

pub fn item(uri: &str, name: &str) -> PlaylistItem {
  PlaylistItem {
    name: name.to_string(),
    artists: vec!["Artist A".to_string(), "Artist B".to_string()],
    uri: uri.to_string(),
    image_url: Some(format!("https://img.test/{}", name)),
  }
}

impl FakeProvider {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(State {
        refresh: Ok(TokenGrant {
          access_token: "refreshed-access".to_string(),
          refresh_token: None,
          expires_in: 3600,
        }),
        exchange: TokenGrant {
          access_token: "exchanged-access".to_string(),
          refresh_token: Some("exchanged-refresh".to_string()),
          expires_in: 3600,
        },
        profile: UpstreamProfile {
          id: "upstream-user".to_string(),
          display_name: Some("Upstream User".to_string()),
          image_url: Some("https://img.test/avatar.png".to_string()),
        },
        playlists: HashMap::new(),
        failing_playlists: HashSet::new(),
        failing_items: HashSet::new(),
        calls: Vec::new(),
      }),
      refresh_delay: Mutex::new(Duration::ZERO),
      refresh_calls: AtomicUsize::new(0),
      created_playlists: AtomicUsize::new(0),
    }
  }

  pub fn set_refresh_grant(&self, grant: TokenGrant) {
    self.state.lock().unwrap().refresh = Ok(grant);
  }

  /// Every following refresh fails with the given HTTP status
  pub fn fail_refresh(&self, status: u16) {
    self.state.lock().unwrap().refresh = Err(status);
  }

  pub fn set_refresh_delay(&self, delay: Duration) {
    *self.refresh_delay.lock().unwrap() = delay;
  }

  pub fn set_exchange_grant(&self, grant: TokenGrant) {
    self.state.lock().unwrap().exchange = grant;
  }

  pub fn add_playlist(&self, id: &str, name: &str, items: Vec<PlaylistItem>) {
    let playlist = Playlist {
      id: id.to_string(),
      name: name.to_string(),
      link: format!("https://open.spotify.com/playlist/{}", id),
    };
    self.state.lock().unwrap().playlists.insert(id.to_string(), (playlist, items));
  }

  pub fn fail_playlist(&self, id: &str) {
    self.state.lock().unwrap().failing_playlists.insert(id.to_string());
  }

  /// The playlist itself resolves but listing its items fails
  pub fn fail_playlist_items(&self, id: &str) {
    self.state.lock().unwrap().failing_items.insert(id.to_string());
  }

  pub fn refresh_calls(&self) -> usize {
    self.refresh_calls.load(Ordering::SeqCst)
  }

  pub fn created_playlists(&self) -> usize {
    self.created_playlists.load(Ordering::SeqCst)
  }

  /// Library and player calls in the order they were made
  pub fn calls(&self) -> Vec<String> {
    self.state.lock().unwrap().calls.clone()
  }

  fn record(&self, call: String) {
    self.state.lock().unwrap().calls.push(call);
  }

  fn playlist(&self, id: &str) -> Result<(Playlist, Vec<PlaylistItem>), UpstreamError> {
    let state = self.state.lock().unwrap();
    if state.failing_playlists.contains(id) {
      return Err(UpstreamError::Http { status: 500, body: "playlist unavailable".to_string() });
    }
    state
      .playlists
      .get(id)
      .cloned()
      .ok_or_else(|| UpstreamError::Http { status: 404, body: "no such playlist".to_string() })
  }
}

fn check(cancel: &CancellationToken) -> Result<(), UpstreamError> {
  if cancel.is_cancelled() {
    Err(UpstreamError::Cancelled)
  } else {
    Ok(())
  }
}

#[async_trait]
impl UpstreamProvider for FakeProvider {
  fn authorize_url(&self, state: &str) -> String {
    format!("https://accounts.test/authorize?state={}", state)
  }

  async fn exchange_code(&self, code: &str, cancel: &CancellationToken) -> Result<TokenGrant, UpstreamError> {
    check(cancel)?;
    if code.is_empty() {
      return Err(UpstreamError::Http { status: 400, body: "invalid_grant".to_string() });
    }
    Ok(self.state.lock().unwrap().exchange.clone())
  }

  async fn refresh(&self, _refresh_token: &str, cancel: &CancellationToken) -> Result<TokenGrant, UpstreamError> {
    check(cancel)?;
    self.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *self.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    self
      .state
      .lock()
      .unwrap()
      .refresh
      .clone()
      .map_err(|status| UpstreamError::Http { status, body: "invalid_grant".to_string() })
  }

  async fn current_user(&self, _access_token: &str, cancel: &CancellationToken) -> Result<UpstreamProfile, UpstreamError> {
    check(cancel)?;
    Ok(self.state.lock().unwrap().profile.clone())
  }

  async fn create_playlist(
    &self,
    _access_token: &str,
    _upstream_user_id: &str,
    name: &str,
    _description: &str,
    cancel: &CancellationToken,
  ) -> Result<Playlist, UpstreamError> {
    check(cancel)?;
    let n = self.created_playlists.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("created-{}", n);
    self.add_playlist(&id, name, Vec::new());
    Ok(self.playlist(&id)?.0)
  }

  async fn get_playlist(&self, _access_token: &str, playlist_id: &str, cancel: &CancellationToken) -> Result<Playlist, UpstreamError> {
    check(cancel)?;
    Ok(self.playlist(playlist_id)?.0)
  }

  async fn get_playlist_items(
    &self,
    _access_token: &str,
    playlist_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<PlaylistItem>, UpstreamError> {
    check(cancel)?;
    if self.state.lock().unwrap().failing_items.contains(playlist_id) {
      return Err(UpstreamError::Http { status: 502, body: "items unavailable".to_string() });
    }
    Ok(self.playlist(playlist_id)?.1)
  }

  async fn save_tracks(&self, _access_token: &str, ids: &[String], cancel: &CancellationToken) -> Result<(), UpstreamError> {
    check(cancel)?;
    self.record(format!("save:{}", ids.join(",")));
    Ok(())
  }

  async fn remove_saved_tracks(&self, _access_token: &str, ids: &[String], cancel: &CancellationToken) -> Result<(), UpstreamError> {
    check(cancel)?;
    self.record(format!("remove:{}", ids.join(",")));
    Ok(())
  }

  async fn play(
    &self,
    _access_token: &str,
    device_id: Option<&str>,
    uris: &[String],
    cancel: &CancellationToken,
  ) -> Result<(), UpstreamError> {
    check(cancel)?;
    self.record(format!("play:{}:{}", device_id.unwrap_or("-"), uris.join(",")));
    Ok(())
  }

  async fn transfer_playback(&self, _access_token: &str, device_id: &str, cancel: &CancellationToken) -> Result<(), UpstreamError> {
    check(cancel)?;
    self.record(format!("transfer:{}", device_id));
    Ok(())
  }
}
