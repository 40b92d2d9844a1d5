use std::time::Duration;

use super::UpstreamError;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
  /// Upper bound for both backoff and honored `Retry-After` values
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_millis(250),
      max_delay: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  pub fn with_max_retries(max_retries: u32) -> Self {
    Self { max_retries, ..Self::default() }
  }

  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Whether a failed attempt may be repeated. Requests that are not
  /// idempotent are only repeated when the provider is known not to have
  /// acted on them.
  pub fn should_retry(&self, error: &UpstreamError, idempotent: bool) -> bool {
    match error {
      UpstreamError::Http { status: 429, .. } => true,
      UpstreamError::Http { status, .. } => idempotent && *status >= 500,
      UpstreamError::Transport(e) => e.is_connect() || (idempotent && e.is_timeout()),
      UpstreamError::Timeout => idempotent,
      UpstreamError::Malformed(_) | UpstreamError::Cancelled => false,
    }
  }

  /// Delay before the next attempt, honoring the provider's `Retry-After`
  pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
    match retry_after {
      Some(after) => after.min(self.max_delay),
      None => self.backoff(attempt),
    }
  }
}
