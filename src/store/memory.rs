//! In-memory storage used by service tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CredentialStore, GenreStore, LikeStore, SetStore, StoreResult, TrackStore, UserStore};
use crate::db::models::{
  Genre, Like, NewCredential, NewSet, NewTrack, ProfileUpdate, Set, Track, UpstreamCredential, User,
};
use crate::error::AppError;

const GENRES: &[&str] = &["Electronic", "Jazz", "Pop", "Rock"];

#[derive(Default)]
struct Inner {
  next_id: i64,
  users: Vec<User>,
  credentials: HashMap<i64, UpstreamCredential>,
  sets: Vec<Set>,
  tracks: Vec<Track>,
  // (set_id, position, track_id)
  set_tracks: Vec<(i64, i64, i64)>,
  likes: Vec<Like>,
  genres: Vec<Genre>,
  user_genres: BTreeSet<(i64, i64)>,
}

impl Inner {
  fn id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }

  fn genre_ids(&self, names: &[String]) -> StoreResult<Vec<i64>> {
    names
      .iter()
      .map(|name| {
        self.genres
          .iter()
          .find(|g| &g.name == name)
          .map(|g| g.id)
          .ok_or_else(|| AppError::Validation(format!("Unknown genre: {}", name)))
      })
      .collect()
  }
}

pub struct MemoryStore {
  inner: Mutex<Inner>,
  credential_writes: AtomicUsize,
  fail_credential_writes: AtomicBool,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    let mut inner = Inner::default();
    for name in GENRES {
      let id = inner.id();
      inner.genres.push(Genre { id, name: name.to_string() });
    }
    Self {
      inner: Mutex::new(inner),
      credential_writes: AtomicUsize::new(0),
      fail_credential_writes: AtomicBool::new(false),
    }
  }

  /// Number of successful credential replaces
  pub fn credential_writes(&self) -> usize {
    self.credential_writes.load(Ordering::SeqCst)
  }

  /// Make every following credential replace abort like a failed commit
  pub fn fail_credential_writes(&self, fail: bool) {
    self.fail_credential_writes.store(fail, Ordering::SeqCst);
  }

  pub fn track_count(&self) -> usize {
    self.inner.lock().unwrap().tracks.len()
  }

  pub fn credential_count(&self, user_id: i64) -> usize {
    self.inner.lock().unwrap().credentials.contains_key(&user_id) as usize
  }

  pub fn all_sets(&self) -> Vec<Set> {
    self.inner.lock().unwrap().sets.clone()
  }
}

#[async_trait]
impl UserStore for MemoryStore {
  async fn create_user(&self, username: &str, password_hash: &str, genres: &[String]) -> StoreResult<User> {
    let mut inner = self.inner.lock().unwrap();
    if inner.users.iter().any(|u| u.username == username) {
      return Err(AppError::Conflict("Username already exists".to_string()));
    }
    let genre_ids = inner.genre_ids(genres)?;

    let id = inner.id();
    let user = User {
      id,
      username: username.to_string(),
      password_hash: password_hash.to_string(),
      upstream_user_id: None,
      playlist_id: None,
      profile_pic_url: None,
      created_at: 0,
    };
    inner.users.push(user.clone());
    for genre_id in genre_ids {
      inner.user_genres.insert((id, genre_id));
    }
    Ok(user)
  }

  async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
    Ok(self.inner.lock().unwrap().users.iter().find(|u| u.id == id).cloned())
  }

  async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
    Ok(self.inner.lock().unwrap().users.iter().find(|u| u.username == username).cloned())
  }

  async fn list_users(&self) -> StoreResult<Vec<User>> {
    Ok(self.inner.lock().unwrap().users.clone())
  }

  async fn update_profile(&self, id: i64, username: &str, genres: &[String]) -> StoreResult<User> {
    let mut inner = self.inner.lock().unwrap();
    if inner.users.iter().any(|u| u.username == username && u.id != id) {
      return Err(AppError::Conflict("Username already exists".to_string()));
    }
    let genre_ids = inner.genre_ids(genres)?;

    let user = inner
      .users
      .iter_mut()
      .find(|u| u.id == id)
      .ok_or(AppError::NotFound("user"))?;
    user.username = username.to_string();
    let user = user.clone();

    inner.user_genres.retain(|(user_id, _)| *user_id != id);
    for genre_id in genre_ids {
      inner.user_genres.insert((id, genre_id));
    }
    Ok(user)
  }
}

#[async_trait]
impl CredentialStore for MemoryStore {
  async fn find_credential(&self, user_id: i64) -> StoreResult<Option<UpstreamCredential>> {
    Ok(self.inner.lock().unwrap().credentials.get(&user_id).cloned())
  }

  async fn replace_credential(
    &self,
    user_id: i64,
    credential: &NewCredential,
    profile: Option<&ProfileUpdate>,
  ) -> StoreResult<UpstreamCredential> {
    if self.fail_credential_writes.load(Ordering::SeqCst) {
      return Err(AppError::Storage(sqlx::Error::PoolTimedOut));
    }

    let mut inner = self.inner.lock().unwrap();
    if !inner.users.iter().any(|u| u.id == user_id) {
      return Err(AppError::NotFound("user"));
    }

    let id = inner.id();
    let saved = UpstreamCredential {
      id,
      user_id,
      access_token: credential.access_token.clone(),
      refresh_token: credential.refresh_token.clone(),
      expires_at: credential.expires_at,
      created_at: 0,
    };
    inner.credentials.insert(user_id, saved.clone());

    if let Some(profile) = profile {
      if let Some(user) = inner.users.iter_mut().find(|u| u.id == user_id) {
        if let Some(v) = &profile.upstream_user_id {
          user.upstream_user_id = Some(v.clone());
        }
        if let Some(v) = &profile.playlist_id {
          user.playlist_id = Some(v.clone());
        }
        if let Some(v) = &profile.profile_pic_url {
          user.profile_pic_url = Some(v.clone());
        }
      }
      if let Some(set) = &profile.provisioned_set {
        let id = inner.id();
        inner.sets.push(Set {
          id,
          user_id,
          name: set.name.clone(),
          link: set.link.clone(),
          created_at: 0,
        });
      }
    }

    self.credential_writes.fetch_add(1, Ordering::SeqCst);
    Ok(saved)
  }

  async fn users_with_credentials(&self) -> StoreResult<Vec<User>> {
    let inner = self.inner.lock().unwrap();
    Ok(inner
      .users
      .iter()
      .filter(|u| inner.credentials.contains_key(&u.id))
      .cloned()
      .collect())
  }
}

#[async_trait]
impl SetStore for MemoryStore {
  async fn create_set(&self, user_id: i64, set: &NewSet) -> StoreResult<Set> {
    let mut inner = self.inner.lock().unwrap();
    let id = inner.id();
    let set = Set {
      id,
      user_id,
      name: set.name.clone(),
      link: set.link.clone(),
      created_at: 0,
    };
    inner.sets.push(set.clone());
    Ok(set)
  }

  async fn sets_for_owner(&self, user_id: i64) -> StoreResult<Vec<Set>> {
    let inner = self.inner.lock().unwrap();
    Ok(inner.sets.iter().filter(|s| s.user_id == user_id).cloned().collect())
  }

  async fn append_association(&self, set_id: i64, track_id: i64) -> StoreResult<bool> {
    let mut inner = self.inner.lock().unwrap();
    let existing = inner.set_tracks.iter().filter(|(s, _, _)| *s == set_id);
    let mut position = 0;
    for (_, _, t) in existing {
      if *t == track_id {
        return Ok(false);
      }
      position += 1;
    }
    inner.set_tracks.push((set_id, position, track_id));
    Ok(true)
  }
}

#[async_trait]
impl TrackStore for MemoryStore {
  async fn find_track(&self, id: i64) -> StoreResult<Option<Track>> {
    Ok(self.inner.lock().unwrap().tracks.iter().find(|t| t.id == id).cloned())
  }

  async fn find_by_uri(&self, uri: &str) -> StoreResult<Option<Track>> {
    Ok(self.inner.lock().unwrap().tracks.iter().find(|t| t.uri == uri).cloned())
  }

  async fn create_track(&self, track: &NewTrack) -> StoreResult<Track> {
    let mut inner = self.inner.lock().unwrap();
    if inner.tracks.iter().any(|t| t.uri == track.uri) {
      return Err(AppError::Conflict(format!("Track {} already exists", track.uri)));
    }
    let id = inner.id();
    let track = Track {
      id,
      name: track.name.clone(),
      artist: track.artist.clone(),
      uri: track.uri.clone(),
      img_url: track.img_url.clone(),
      created_at: 0,
    };
    inner.tracks.push(track.clone());
    Ok(track)
  }

  async fn tracks_for_set(&self, set_id: i64) -> StoreResult<Vec<Track>> {
    let inner = self.inner.lock().unwrap();
    let mut rows: Vec<(i64, i64)> = inner
      .set_tracks
      .iter()
      .filter(|(s, _, _)| *s == set_id)
      .map(|(_, position, track_id)| (*position, *track_id))
      .collect();
    rows.sort();
    Ok(rows
      .into_iter()
      .filter_map(|(_, track_id)| inner.tracks.iter().find(|t| t.id == track_id).cloned())
      .collect())
  }
}

#[async_trait]
impl LikeStore for MemoryStore {
  async fn insert_like(&self, user_id: i64, track_id: i64, at: i64) -> StoreResult<bool> {
    let mut inner = self.inner.lock().unwrap();
    if inner.likes.iter().any(|l| l.user_id == user_id && l.track_id == track_id) {
      return Ok(false);
    }
    let id = inner.id();
    inner.likes.push(Like { id, user_id, track_id, created_at: at });
    Ok(true)
  }

  async fn delete_like(&self, user_id: i64, track_id: i64) -> StoreResult<bool> {
    let mut inner = self.inner.lock().unwrap();
    let before = inner.likes.len();
    inner.likes.retain(|l| !(l.user_id == user_id && l.track_id == track_id));
    Ok(inner.likes.len() < before)
  }

  async fn liked_track_ids(&self, user_id: i64) -> StoreResult<HashSet<i64>> {
    let inner = self.inner.lock().unwrap();
    Ok(inner.likes.iter().filter(|l| l.user_id == user_id).map(|l| l.track_id).collect())
  }

  async fn like_counts_since(&self, since: i64) -> StoreResult<HashMap<i64, i64>> {
    let inner = self.inner.lock().unwrap();
    let mut counts = HashMap::new();
    for like in inner.likes.iter().filter(|l| l.created_at >= since) {
      *counts.entry(like.track_id).or_insert(0) += 1;
    }
    Ok(counts)
  }
}

#[async_trait]
impl GenreStore for MemoryStore {
  async fn list_genres(&self) -> StoreResult<Vec<Genre>> {
    Ok(self.inner.lock().unwrap().genres.clone())
  }

  async fn genres_for_user(&self, user_id: i64) -> StoreResult<Vec<String>> {
    let inner = self.inner.lock().unwrap();
    let mut names: Vec<String> = inner
      .user_genres
      .iter()
      .filter(|(u, _)| *u == user_id)
      .filter_map(|(_, g)| inner.genres.iter().find(|genre| genre.id == *g))
      .map(|g| g.name.clone())
      .collect();
    names.sort();
    Ok(names)
  }

  async fn genres_by_user(&self) -> StoreResult<HashMap<i64, HashSet<String>>> {
    let inner = self.inner.lock().unwrap();
    let mut by_user: HashMap<i64, HashSet<String>> = HashMap::new();
    for (user_id, genre_id) in &inner.user_genres {
      if let Some(genre) = inner.genres.iter().find(|g| g.id == *genre_id) {
        by_user.entry(*user_id).or_default().insert(genre.name.clone());
      }
    }
    Ok(by_user)
  }
}
