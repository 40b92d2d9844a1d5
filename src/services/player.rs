use std::str::FromStr;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::upstream::UpstreamProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
  /// Start playback, optionally of specific URIs on a specific device
  Play { device_id: Option<String>, uris: Vec<String> },
  /// Transfer playback to a device without starting it
  Activate { device_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
  Play,
  Activate,
}

impl FromStr for ActionKind {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "play" => Ok(ActionKind::Play),
      "activate" => Ok(ActionKind::Activate),
      other => Err(AppError::Validation(format!("Unsupported player action: {}", other))),
    }
  }
}

impl PlayerAction {
  /// Build an action from query parameters; `uris` is comma separated
  pub fn parse(action: &str, device_id: Option<&str>, uris: Option<&str>) -> Result<Self, AppError> {
    let device_id = device_id.map(str::trim).filter(|d| !d.is_empty()).map(str::to_string);

    match action.parse::<ActionKind>()? {
      ActionKind::Play => Ok(PlayerAction::Play {
        device_id,
        uris: uris
          .unwrap_or_default()
          .split(',')
          .map(str::trim)
          .filter(|u| !u.is_empty())
          .map(str::to_string)
          .collect(),
      }),
      ActionKind::Activate => device_id
        .map(|device_id| PlayerAction::Activate { device_id })
        .ok_or_else(|| AppError::Validation("device_id is required to activate a device".to_string())),
    }
  }
}

pub async fn perform(
  provider: &dyn UpstreamProvider,
  access_token: &str,
  action: &PlayerAction,
  cancel: &CancellationToken,
) -> Result<(), AppError> {
  match action {
    PlayerAction::Play { device_id, uris } => provider
      .play(access_token, device_id.as_deref(), uris, cancel)
      .await
      .map_err(AppError::upstream),
    PlayerAction::Activate { device_id } => provider
      .transfer_playback(access_token, device_id, cancel)
      .await
      .map_err(AppError::upstream),
  }
}
