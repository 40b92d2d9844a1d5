use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::CredentialRefresher;
use crate::db::models::{NewSet, NewTrack, User};
use crate::error::AppError;
use crate::store::Storage;
use crate::upstream::{PlaylistItem, UpstreamProvider};

/// Outcome of one sync run
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub users_synced: usize,
  pub users_failed: usize,
  /// Users with a credential but no shared playlist yet
  pub users_skipped: usize,
  pub sets_created: usize,
  pub tracks_created: usize,
  pub tracks_reused: usize,
  pub items_failed: usize,
  pub cancelled: bool,
}

/// Pulls every connected user's shared playlist into a new local Set.
///
/// Tracks are deduplicated by URI. Failures are scoped to the user or the
/// item that caused them and never abort the run.
pub struct SyncEngine {
  store: Arc<dyn Storage>,
  provider: Arc<dyn UpstreamProvider>,
  refresher: Arc<CredentialRefresher>,
}

impl SyncEngine {
  pub fn new(store: Arc<dyn Storage>, provider: Arc<dyn UpstreamProvider>, refresher: Arc<CredentialRefresher>) -> Self {
    Self { store, provider, refresher }
  }

  pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport, AppError> {
    let users = self.store.users_with_credentials().await?;
    let mut report = SyncReport::default();
    tracing::info!("Starting playlist sync for {} users", users.len());

    for user in users {
      if cancel.is_cancelled() {
        report.cancelled = true;
        break;
      }

      let Some(playlist_id) = user.playlist_id.clone() else {
        tracing::debug!("User {} has no shared playlist, skipping", user.id);
        report.users_skipped += 1;
        continue;
      };

      match self.sync_user(&user, &playlist_id, &mut report, cancel).await {
        Ok(()) => report.users_synced += 1,
        Err(AppError::Cancelled) => {
          report.cancelled = true;
          break;
        }
        Err(e) => {
          tracing::warn!("Sync failed for user {}: {}", user.id, e);
          report.users_failed += 1;
        }
      }
    }

    tracing::info!(
      "Playlist sync finished: {} synced, {} failed, {} skipped, {} sets, {} new tracks, {} reused, {} items failed",
      report.users_synced,
      report.users_failed,
      report.users_skipped,
      report.sets_created,
      report.tracks_created,
      report.tracks_reused,
      report.items_failed,
    );
    Ok(report)
  }

  async fn sync_user(
    &self,
    user: &User,
    playlist_id: &str,
    report: &mut SyncReport,
    cancel: &CancellationToken,
  ) -> Result<(), AppError> {
    let token = self.refresher.ensure_fresh(user.id, cancel).await?;

    let playlist = self
      .provider
      .get_playlist(&token, playlist_id, cancel)
      .await
      .map_err(AppError::upstream)?;

    // No set is written until its items are read
    let items = self
      .provider
      .get_playlist_items(&token, playlist_id, cancel)
      .await
      .map_err(AppError::upstream)?;

    let set = self
      .store
      .create_set(user.id, &NewSet { name: playlist.name, link: playlist.link })
      .await?;
    report.sets_created += 1;

    for item in &items {
      match self.sync_item(set.id, item).await {
        Ok(true) => report.tracks_reused += 1,
        Ok(false) => report.tracks_created += 1,
        Err(e) => {
          tracing::warn!("Skipping item {} of set {}: {}", item.uri, set.id, e);
          report.items_failed += 1;
        }
      }
    }

    tracing::debug!("Synced {} items into set {} for user {}", items.len(), set.id, user.id);
    Ok(())
  }

  /// Resolve the item to a track and associate it with the set. Returns
  /// whether an existing track was reused.
  async fn sync_item(&self, set_id: i64, item: &PlaylistItem) -> Result<bool, AppError> {
    if item.uri.is_empty() {
      return Err(AppError::Validation("item has no URI".to_string()));
    }

    let (track, reused) = match self.store.find_by_uri(&item.uri).await? {
      Some(track) => (track, true),
      None => {
        let new_track = NewTrack {
          name: item.name.clone(),
          artist: item.artists.join(", "),
          uri: item.uri.clone(),
          img_url: item.image_url.clone(),
        };
        match self.store.create_track(&new_track).await {
          Ok(track) => (track, false),
          // created by someone else since the lookup
          Err(AppError::Conflict(_)) => match self.store.find_by_uri(&item.uri).await? {
            Some(track) => (track, true),
            None => return Err(AppError::Internal(format!("track {} vanished", item.uri))),
          },
          Err(e) => return Err(e),
        }
      }
    };

    self.store.append_association(set_id, track.id).await?;
    Ok(reused)
  }
}

/// Run the engine every `every` until `cancel` fires. The first run happens
/// one full interval after start.
pub fn spawn_schedule(engine: Arc<SyncEngine>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick fires immediately
    interval.tick().await;

    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        _ = interval.tick() => {}
      }

      if let Err(e) = engine.run(&cancel).await {
        tracing::error!("Scheduled playlist sync failed: {}", e);
      }
    }

    tracing::debug!("Sync schedule stopped");
  })
}
