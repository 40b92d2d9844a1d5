use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
  pub id: i64,
  pub username: String,
  pub password_hash: String,
  pub upstream_user_id: Option<String>,
  /// Upstream playlist the user shares
  pub playlist_id: Option<String>,
  pub profile_pic_url: Option<String>,
  pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UpstreamCredential {
  pub id: i64,
  pub user_id: i64,
  pub access_token: String,
  pub refresh_token: String,
  /// Unix seconds
  pub expires_at: i64,
  pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
  Valid,
  Expired,
}

impl UpstreamCredential {
  pub fn state_at(&self, now: i64) -> CredentialState {
    if self.expires_at > now {
      CredentialState::Valid
    } else {
      CredentialState::Expired
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: i64,
}

/// User fields written in the same transaction as a credential replace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
  pub upstream_user_id: Option<String>,
  pub playlist_id: Option<String>,
  pub profile_pic_url: Option<String>,
  pub provisioned_set: Option<NewSet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Set {
  pub id: i64,
  pub user_id: i64,
  pub name: String,
  pub link: String,
  pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSet {
  pub name: String,
  pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Track {
  pub id: i64,
  pub name: String,
  pub artist: String,
  /// Canonical upstream URI, unique across storage
  pub uri: String,
  pub img_url: Option<String>,
  pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrack {
  pub name: String,
  pub artist: String,
  pub uri: String,
  pub img_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Like {
  pub id: i64,
  pub user_id: i64,
  pub track_id: i64,
  pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Genre {
  pub id: i64,
  pub name: String,
}
