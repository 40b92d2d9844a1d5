//! Typed storage ports, one per aggregate.
//!
//! Services depend on these traits rather than on a pool so that dedup,
//! association and credential-replace semantics can be exercised against
//! the in-memory fake as well as SQLite.

#[cfg(test)]
pub mod memory;
pub mod sqlite;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::db::models::{
  Genre, NewCredential, NewSet, NewTrack, ProfileUpdate, Set, Track, UpstreamCredential, User,
};
use crate::error::AppError;

pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, AppError>;

#[async_trait]
pub trait UserStore: Send + Sync {
  /// Fails with `Conflict` when the username is taken and `Validation` for unknown genres
  async fn create_user(&self, username: &str, password_hash: &str, genres: &[String]) -> StoreResult<User>;

  async fn find_user(&self, id: i64) -> StoreResult<Option<User>>;

  async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

  /// All users in id order
  async fn list_users(&self) -> StoreResult<Vec<User>>;

  /// Rename and replace the genre set in one transaction
  async fn update_profile(&self, id: i64, username: &str, genres: &[String]) -> StoreResult<User>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
  async fn find_credential(&self, user_id: i64) -> StoreResult<Option<UpstreamCredential>>;

  /// Atomically swap the user's credential and apply `profile`, if any.
  /// Either everything is written or nothing is.
  async fn replace_credential(
    &self,
    user_id: i64,
    credential: &NewCredential,
    profile: Option<&ProfileUpdate>,
  ) -> StoreResult<UpstreamCredential>;

  /// Users holding a credential, in id order
  async fn users_with_credentials(&self) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait SetStore: Send + Sync {
  async fn create_set(&self, user_id: i64, set: &NewSet) -> StoreResult<Set>;

  async fn sets_for_owner(&self, user_id: i64) -> StoreResult<Vec<Set>>;

  /// Idempotent; returns false when the association already existed
  async fn append_association(&self, set_id: i64, track_id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait TrackStore: Send + Sync {
  async fn find_track(&self, id: i64) -> StoreResult<Option<Track>>;

  async fn find_by_uri(&self, uri: &str) -> StoreResult<Option<Track>>;

  /// Fails with `Conflict` when a track with the same URI exists
  async fn create_track(&self, track: &NewTrack) -> StoreResult<Track>;

  /// Tracks of a set in association order
  async fn tracks_for_set(&self, set_id: i64) -> StoreResult<Vec<Track>>;
}

#[async_trait]
pub trait LikeStore: Send + Sync {
  /// Returns false when the user already liked the track
  async fn insert_like(&self, user_id: i64, track_id: i64, at: i64) -> StoreResult<bool>;

  /// Returns false when there was nothing to delete
  async fn delete_like(&self, user_id: i64, track_id: i64) -> StoreResult<bool>;

  async fn liked_track_ids(&self, user_id: i64) -> StoreResult<HashSet<i64>>;

  /// Like count per track for likes created at or after `since`
  async fn like_counts_since(&self, since: i64) -> StoreResult<HashMap<i64, i64>>;
}

#[async_trait]
pub trait GenreStore: Send + Sync {
  async fn list_genres(&self) -> StoreResult<Vec<Genre>>;

  async fn genres_for_user(&self, user_id: i64) -> StoreResult<Vec<String>>;

  /// Genre names keyed by user id, for every user with at least one genre
  async fn genres_by_user(&self) -> StoreResult<HashMap<i64, HashSet<String>>>;
}

/// Everything the services need from persistence
pub trait Storage: UserStore + CredentialStore + SetStore + TrackStore + LikeStore + GenreStore {}

impl<T> Storage for T where T: UserStore + CredentialStore + SetStore + TrackStore + LikeStore + GenreStore {}
