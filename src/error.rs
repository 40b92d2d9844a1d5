use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;

use crate::upstream::UpstreamError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
  /// Missing, malformed or expired session credential
  #[error("authentication failed: {0}")]
  Authentication(String),

  #[error("{0}")]
  Validation(String),

  /// Handshake state that was never issued, already consumed or expired
  #[error("unknown or expired handshake state")]
  Correlation,

  #[error("{0} not found")]
  NotFound(&'static str),

  #[error("{0}")]
  Conflict(String),

  #[error("upstream provider error: {source}")]
  Upstream {
    #[source]
    source: UpstreamError,
    /// Set when the failure means the user's upstream grant can no longer be trusted
    invalidates_session: bool,
  },

  #[error("storage error: {0}")]
  Storage(#[from] sqlx::Error),

  #[error("operation cancelled")]
  Cancelled,

  #[error("internal error: {0}")]
  Internal(String),
}

impl AppError {
  /// Upstream failure that leaves the session usable
  pub fn upstream(source: UpstreamError) -> Self {
    match source {
      UpstreamError::Cancelled => AppError::Cancelled,
      source => AppError::Upstream { source, invalidates_session: false },
    }
  }

  /// Upstream failure while refreshing the user's grant
  pub fn upstream_refresh(source: UpstreamError) -> Self {
    match source {
      UpstreamError::Cancelled => AppError::Cancelled,
      source => AppError::Upstream { source, invalidates_session: true },
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
      AppError::Validation(_) | AppError::Correlation => StatusCode::BAD_REQUEST,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Conflict(_) => StatusCode::CONFLICT,
      AppError::Upstream { invalidates_session: true, .. } => StatusCode::UNAUTHORIZED,
      AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
      AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
      AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!("Request failed: {}", self);
    } else {
      tracing::debug!("Request rejected ({}): {}", status, self);
    }

    (status, Json(ErrorResponse { error: self.to_string() })).into_response()
  }
}
