use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, TimeZone};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::db::models::{NewSet, Set, User};
use crate::error::AppError;
use crate::store::Storage;
use crate::upstream::{track_id_from_uri, UpstreamProvider};

pub const NEW_SET_NAME: &str = "My Set 🔥";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackView {
  pub id: i64,
  pub uri: String,
  pub name: String,
  pub artist: String,
  pub liked: bool,
  /// Likes since the start of the current week
  #[serde(rename = "likes")]
  pub weekly_likes: i64,
  pub img_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetView {
  pub id: i64,
  pub name: String,
  pub link: String,
  pub username: String,
  #[serde(rename = "profilePicURL")]
  pub profile_pic_url: Option<String>,
  pub tracks: Vec<TrackView>,
}

/// Share of the requester's genres the other user also has. Zero when the
/// requester has none.
pub fn affinity(requester: &HashSet<String>, other: &HashSet<String>) -> f64 {
  if requester.is_empty() {
    return 0.0;
  }
  requester.intersection(other).count() as f64 / requester.len() as f64
}

/// Order users by descending affinity; equal scores keep their input order
pub fn rank_by_affinity(
  requester: &HashSet<String>,
  candidates: Vec<User>,
  genres: &HashMap<i64, HashSet<String>>,
) -> Vec<User> {
  let none = HashSet::new();
  let mut scored: Vec<(f64, User)> = candidates
    .into_iter()
    .map(|user| (affinity(requester, genres.get(&user.id).unwrap_or(&none)), user))
    .collect();
  // stable
  scored.sort_by(|a, b| b.0.total_cmp(&a.0));
  scored.into_iter().map(|(_, user)| user).collect()
}

/// Most recent Sunday 00:00 in `now`'s time zone
pub fn week_start<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
  let days_back = i64::from(now.weekday().num_days_from_sunday());
  let midnight = (now.date_naive() - TimeDelta::days(days_back)).and_time(NaiveTime::MIN);
  let tz = now.timezone();
  tz.from_local_datetime(&midnight)
    .earliest()
    // midnight skipped by a DST change
    .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
}

pub struct SetService {
  store: Arc<dyn Storage>,
  provider: Arc<dyn UpstreamProvider>,
}

impl SetService {
  pub fn new(store: Arc<dyn Storage>, provider: Arc<dyn UpstreamProvider>) -> Self {
    Self { store, provider }
  }

  /// Other users' sets, most genre-compatible owners first
  pub async fn get_sets<Tz: TimeZone>(&self, requester_id: i64, now: &DateTime<Tz>) -> Result<Vec<SetView>, AppError> {
    let mut genres = self.store.genres_by_user().await?;
    let mine = genres.remove(&requester_id).unwrap_or_default();

    let others: Vec<User> = self
      .store
      .list_users()
      .await?
      .into_iter()
      .filter(|u| u.id != requester_id)
      .collect();
    let ranked = rank_by_affinity(&mine, others, &genres);

    let liked = self.store.liked_track_ids(requester_id).await?;
    let weekly = self.store.like_counts_since(week_start(now).timestamp()).await?;

    let mut views = Vec::new();
    for owner in ranked {
      for set in self.store.sets_for_owner(owner.id).await? {
        let tracks = self
          .store
          .tracks_for_set(set.id)
          .await?
          .into_iter()
          .map(|track| TrackView {
            liked: liked.contains(&track.id),
            weekly_likes: weekly.get(&track.id).copied().unwrap_or(0),
            id: track.id,
            uri: track.uri,
            name: track.name,
            artist: track.artist,
            img_url: track.img_url,
          })
          .collect();

        views.push(SetView {
          id: set.id,
          name: set.name,
          link: set.link,
          username: owner.username.clone(),
          profile_pic_url: owner.profile_pic_url.clone(),
          tracks,
        });
      }
    }

    Ok(views)
  }

  /// Create an upstream playlist for the user and a Set pointing at it
  pub async fn create_set(&self, user: &User, access_token: &str, cancel: &CancellationToken) -> Result<Set, AppError> {
    let upstream_user_id = user
      .upstream_user_id
      .as_deref()
      .ok_or_else(|| AppError::Validation("No upstream account connected".to_string()))?;

    let playlist = self
      .provider
      .create_playlist(access_token, upstream_user_id, NEW_SET_NAME, "", cancel)
      .await
      .map_err(AppError::upstream)?;

    self
      .store
      .create_set(user.id, &NewSet { name: playlist.name, link: playlist.link })
      .await
  }

  /// Like or unlike a track, mirroring the change in the user's upstream
  /// library. Returns false when nothing changed locally.
  pub async fn toggle_like(
    &self,
    user_id: i64,
    track_id: i64,
    liked: bool,
    access_token: &str,
    now: i64,
    cancel: &CancellationToken,
  ) -> Result<bool, AppError> {
    let track = self
      .store
      .find_track(track_id)
      .await?
      .ok_or(AppError::NotFound("track"))?;
    let ids = match track_id_from_uri(&track.uri) {
      Some(id) => vec![id.to_string()],
      None => return Err(AppError::Validation(format!("Track {} has no provider id", track.id))),
    };

    if liked {
      self.provider.save_tracks(access_token, &ids, cancel).await.map_err(AppError::upstream)?;
      self.store.insert_like(user_id, track.id, now).await
    } else {
      self
        .provider
        .remove_saved_tracks(access_token, &ids, cancel)
        .await
        .map_err(AppError::upstream)?;
      self.store.delete_like(user_id, track.id).await
    }
  }
}
