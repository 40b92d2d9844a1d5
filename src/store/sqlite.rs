use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, Transaction};

use super::{CredentialStore, GenreStore, LikeStore, SetStore, StoreResult, TrackStore, UserStore};
use crate::db::{
  models::{Genre, NewCredential, NewSet, NewTrack, ProfileUpdate, Set, Track, UpstreamCredential, User},
  DbPool,
};
use crate::error::AppError;

const USER_COLUMNS: &str =
  "id, username, password_hash, upstream_user_id, playlist_id, profile_pic_url, created_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: DbPool,
}

impl SqliteStore {
  pub fn new(pool: DbPool) -> Self {
    Self { pool }
  }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Resolve genre names to ids, rejecting unknown names
async fn genre_ids(tx: &mut Transaction<'_, Sqlite>, genres: &[String]) -> StoreResult<Vec<i64>> {
  let mut ids = Vec::with_capacity(genres.len());
  for name in genres {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM genres WHERE name = ?")
      .bind(name)
      .fetch_optional(&mut **tx)
      .await?;
    match id {
      Some(id) => ids.push(id),
      None => return Err(AppError::Validation(format!("Unknown genre: {}", name))),
    }
  }
  Ok(ids)
}

async fn assign_genres(tx: &mut Transaction<'_, Sqlite>, user_id: i64, genre_ids: &[i64]) -> StoreResult<()> {
  sqlx::query("DELETE FROM user_genres WHERE user_id = ?")
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

  for genre_id in genre_ids {
    sqlx::query("INSERT OR IGNORE INTO user_genres (user_id, genre_id) VALUES (?, ?)")
      .bind(user_id)
      .bind(genre_id)
      .execute(&mut **tx)
      .await?;
  }
  Ok(())
}

#[async_trait]
impl UserStore for SqliteStore {
  async fn create_user(&self, username: &str, password_hash: &str, genres: &[String]) -> StoreResult<User> {
    let now = Utc::now().timestamp();
    let mut tx = self.pool.begin().await?;

    let genre_ids = genre_ids(&mut tx, genres).await?;

    let result = sqlx::query(
      "INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?)",
    )
    .bind(username)
    .bind(password_hash)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
      if is_unique_violation(&e) {
        AppError::Conflict("Username already exists".to_string())
      } else {
        AppError::Storage(e)
      }
    })?;
    let user_id = result.last_insert_rowid();

    assign_genres(&mut tx, user_id, &genre_ids).await?;

    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
      .bind(user_id)
      .fetch_one(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(user)
  }

  async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(user)
  }

  async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS))
      .bind(username)
      .fetch_optional(&self.pool)
      .await?;
    Ok(user)
  }

  async fn list_users(&self) -> StoreResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))
      .fetch_all(&self.pool)
      .await?;
    Ok(users)
  }

  async fn update_profile(&self, id: i64, username: &str, genres: &[String]) -> StoreResult<User> {
    let mut tx = self.pool.begin().await?;

    let genre_ids = genre_ids(&mut tx, genres).await?;

    let result = sqlx::query("UPDATE users SET username = ? WHERE id = ?")
      .bind(username)
      .bind(id)
      .execute(&mut *tx)
      .await
      .map_err(|e| {
        if is_unique_violation(&e) {
          AppError::Conflict("Username already exists".to_string())
        } else {
          AppError::Storage(e)
        }
      })?;
    if result.rows_affected() == 0 {
      return Err(AppError::NotFound("user"));
    }

    assign_genres(&mut tx, id, &genre_ids).await?;

    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
      .bind(id)
      .fetch_one(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(user)
  }
}

#[async_trait]
impl CredentialStore for SqliteStore {
  async fn find_credential(&self, user_id: i64) -> StoreResult<Option<UpstreamCredential>> {
    let credential = sqlx::query_as::<_, UpstreamCredential>(
      r#"
      SELECT id, user_id, access_token, refresh_token, expires_at, created_at
      FROM upstream_credentials
      WHERE user_id = ?
      "#,
    )
    .bind(user_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(credential)
  }

  async fn replace_credential(
    &self,
    user_id: i64,
    credential: &NewCredential,
    profile: Option<&ProfileUpdate>,
  ) -> StoreResult<UpstreamCredential> {
    let now = Utc::now().timestamp();
    // Dropping the transaction on any early return rolls it back
    let mut tx = self.pool.begin().await?;

    sqlx::query("DELETE FROM upstream_credentials WHERE user_id = ?")
      .bind(user_id)
      .execute(&mut *tx)
      .await?;

    let saved = sqlx::query_as::<_, UpstreamCredential>(
      r#"
      INSERT INTO upstream_credentials (user_id, access_token, refresh_token, expires_at, created_at)
      VALUES (?, ?, ?, ?, ?)
      RETURNING id, user_id, access_token, refresh_token, expires_at, created_at
      "#,
    )
    .bind(user_id)
    .bind(&credential.access_token)
    .bind(&credential.refresh_token)
    .bind(credential.expires_at)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(profile) = profile {
      let result = sqlx::query(
        r#"
        UPDATE users
        SET upstream_user_id = COALESCE(?, upstream_user_id),
            playlist_id = COALESCE(?, playlist_id),
            profile_pic_url = COALESCE(?, profile_pic_url)
        WHERE id = ?
        "#,
      )
      .bind(&profile.upstream_user_id)
      .bind(&profile.playlist_id)
      .bind(&profile.profile_pic_url)
      .bind(user_id)
      .execute(&mut *tx)
      .await?;
      if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
      }

      if let Some(set) = &profile.provisioned_set {
        sqlx::query("INSERT INTO sets (user_id, name, link, created_at) VALUES (?, ?, ?, ?)")
          .bind(user_id)
          .bind(&set.name)
          .bind(&set.link)
          .bind(now)
          .execute(&mut *tx)
          .await?;
      }
    }

    tx.commit().await?;
    Ok(saved)
  }

  async fn users_with_credentials(&self) -> StoreResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
      r#"
      SELECT u.id, u.username, u.password_hash, u.upstream_user_id, u.playlist_id,
             u.profile_pic_url, u.created_at
      FROM users u
      JOIN upstream_credentials c ON c.user_id = u.id
      ORDER BY u.id
      "#,
    )
    .fetch_all(&self.pool)
    .await?;
    Ok(users)
  }
}

#[async_trait]
impl SetStore for SqliteStore {
  async fn create_set(&self, user_id: i64, set: &NewSet) -> StoreResult<Set> {
    let now = Utc::now().timestamp();
    let set = sqlx::query_as::<_, Set>(
      r#"
      INSERT INTO sets (user_id, name, link, created_at)
      VALUES (?, ?, ?, ?)
      RETURNING id, user_id, name, link, created_at
      "#,
    )
    .bind(user_id)
    .bind(&set.name)
    .bind(&set.link)
    .bind(now)
    .fetch_one(&self.pool)
    .await?;
    Ok(set)
  }

  async fn sets_for_owner(&self, user_id: i64) -> StoreResult<Vec<Set>> {
    let sets = sqlx::query_as::<_, Set>(
      "SELECT id, user_id, name, link, created_at FROM sets WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(sets)
  }

  async fn append_association(&self, set_id: i64, track_id: i64) -> StoreResult<bool> {
    let result = sqlx::query(
      r#"
      INSERT OR IGNORE INTO set_tracks (set_id, track_id, position)
      VALUES (?, ?, (SELECT COUNT(*) FROM set_tracks WHERE set_id = ?))
      "#,
    )
    .bind(set_id)
    .bind(track_id)
    .bind(set_id)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }
}

#[async_trait]
impl TrackStore for SqliteStore {
  async fn find_track(&self, id: i64) -> StoreResult<Option<Track>> {
    let track = sqlx::query_as::<_, Track>(
      "SELECT id, name, artist, uri, img_url, created_at FROM tracks WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(track)
  }

  async fn find_by_uri(&self, uri: &str) -> StoreResult<Option<Track>> {
    let track = sqlx::query_as::<_, Track>(
      "SELECT id, name, artist, uri, img_url, created_at FROM tracks WHERE uri = ?",
    )
    .bind(uri)
    .fetch_optional(&self.pool)
    .await?;
    Ok(track)
  }

  async fn create_track(&self, track: &NewTrack) -> StoreResult<Track> {
    let now = Utc::now().timestamp();
    sqlx::query_as::<_, Track>(
      r#"
      INSERT INTO tracks (name, artist, uri, img_url, created_at)
      VALUES (?, ?, ?, ?, ?)
      RETURNING id, name, artist, uri, img_url, created_at
      "#,
    )
    .bind(&track.name)
    .bind(&track.artist)
    .bind(&track.uri)
    .bind(&track.img_url)
    .bind(now)
    .fetch_one(&self.pool)
    .await
    .map_err(|e| {
      if is_unique_violation(&e) {
        AppError::Conflict(format!("Track {} already exists", track.uri))
      } else {
        AppError::Storage(e)
      }
    })
  }

  async fn tracks_for_set(&self, set_id: i64) -> StoreResult<Vec<Track>> {
    let tracks = sqlx::query_as::<_, Track>(
      r#"
      SELECT t.id, t.name, t.artist, t.uri, t.img_url, t.created_at
      FROM tracks t
      JOIN set_tracks st ON st.track_id = t.id
      WHERE st.set_id = ?
      ORDER BY st.position
      "#,
    )
    .bind(set_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(tracks)
  }
}

#[async_trait]
impl LikeStore for SqliteStore {
  async fn insert_like(&self, user_id: i64, track_id: i64, at: i64) -> StoreResult<bool> {
    let result = sqlx::query(
      "INSERT OR IGNORE INTO likes (user_id, track_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(track_id)
    .bind(at)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn delete_like(&self, user_id: i64, track_id: i64) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM likes WHERE user_id = ? AND track_id = ?")
      .bind(user_id)
      .bind(track_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn liked_track_ids(&self, user_id: i64) -> StoreResult<HashSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT track_id FROM likes WHERE user_id = ?")
      .bind(user_id)
      .fetch_all(&self.pool)
      .await?;
    Ok(ids.into_iter().collect())
  }

  async fn like_counts_since(&self, since: i64) -> StoreResult<HashMap<i64, i64>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
      "SELECT track_id, COUNT(*) FROM likes WHERE created_at >= ? GROUP BY track_id",
    )
    .bind(since)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.into_iter().collect())
  }
}

#[async_trait]
impl GenreStore for SqliteStore {
  async fn list_genres(&self) -> StoreResult<Vec<Genre>> {
    let genres = sqlx::query_as::<_, Genre>("SELECT id, name FROM genres ORDER BY name")
      .fetch_all(&self.pool)
      .await?;
    Ok(genres)
  }

  async fn genres_for_user(&self, user_id: i64) -> StoreResult<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
      r#"
      SELECT g.name
      FROM genres g
      JOIN user_genres ug ON ug.genre_id = g.id
      WHERE ug.user_id = ?
      ORDER BY g.name
      "#,
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(names)
  }

  async fn genres_by_user(&self) -> StoreResult<HashMap<i64, HashSet<String>>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
      "SELECT ug.user_id, g.name FROM user_genres ug JOIN genres g ON g.id = ug.genre_id",
    )
    .fetch_all(&self.pool)
    .await?;

    let mut by_user: HashMap<i64, HashSet<String>> = HashMap::new();
    for (user_id, name) in rows {
      by_user.entry(user_id).or_default().insert(name);
    }
    Ok(by_user)
  }
}
