use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub port: u16,
  pub host: String,
  pub frontend_url: String,
  /// Key used to sign session tokens
  pub session_secret: String,
  pub spotify: SpotifyConfig,
  pub upstream_timeout: Duration,
  pub upstream_max_retries: u32,
  pub handshake_ttl: Duration,
  /// `None` disables the in-process sync schedule
  pub sync_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
  pub client_id: String,
  pub client_secret: String,
  pub redirect_url: String,
  pub scopes: Vec<String>,
}

impl Config {
  pub fn from_env() -> Result<Self, String> {
    let database_url = env::var("DATABASE_URL")
      .unwrap_or_else(|_| "sqlite://bangr.db".to_string());

    let port = env::var("PORT")
      .unwrap_or_else(|_| "8080".to_string())
      .parse()
      .map_err(|e| format!("Invalid PORT: {}", e))?;

    let host = env::var("HOST")
      .unwrap_or_else(|_| "0.0.0.0".to_string());

    let frontend_url = env::var("FRONTEND_URL")
      .unwrap_or_else(|_| "http://localhost:5173".to_string());

    let session_secret = env::var("SECRET")
      .map_err(|_| "SECRET must be set".to_string())?;
    if session_secret.is_empty() {
      return Err("SECRET must not be empty".to_string());
    }

    let spotify = SpotifyConfig {
      client_id: env::var("SPOTIFY_CLIENT_ID").unwrap_or_default(),
      client_secret: env::var("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
      redirect_url: env::var("SPOTIFY_REDIRECT_URL")
        .unwrap_or_else(|_| "http://localhost:8080/callback".to_string()),
      scopes: parse_scopes(&env::var("SPOTIFY_SCOPES").unwrap_or_else(|_| DEFAULT_SCOPES.to_string())),
    };

    let upstream_timeout = Duration::from_secs(parse_env("UPSTREAM_TIMEOUT_SECS", 10)?);
    let upstream_max_retries = parse_env::<u32>("UPSTREAM_MAX_RETRIES", 2)?;
    let handshake_ttl = Duration::from_secs(parse_env("HANDSHAKE_TTL_SECS", 600)?);
    let sync_interval = match parse_env::<u64>("SYNC_INTERVAL_SECS", 7 * 24 * 60 * 60)? {
      0 => None,
      secs => Some(Duration::from_secs(secs)),
    };

    Ok(Self {
      database_url,
      port,
      host,
      frontend_url,
      session_secret,
      spotify,
      upstream_timeout,
      upstream_max_retries,
      handshake_ttl,
      sync_interval,
    })
  }

  pub fn bind_address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

const DEFAULT_SCOPES: &str = "user-read-private user-library-read user-library-modify \
  playlist-read-private playlist-modify-private streaming user-modify-playback-state";

fn parse_scopes(raw: &str) -> Vec<String> {
  raw
    .split(|c: char| c.is_whitespace() || c == ',')
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

fn parse_env<T>(key: &str, default: T) -> Result<T, String>
where
  T: FromStr,
  T::Err: Display,
{
  match env::var(key) {
    Ok(raw) => parse_value(key, &raw),
    Err(_) => Ok(default),
  }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, String>
where
  T: FromStr,
  T::Err: Display,
{
  raw.trim().parse().map_err(|e| format!("Invalid {}: {}", key, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scopes_accept_spaces_and_commas() {
    assert_eq!(
      parse_scopes("user-read-private, streaming  playlist-read-private"),
      vec!["user-read-private", "streaming", "playlist-read-private"]
    );
    assert!(parse_scopes("   ").is_empty());
  }

  #[test]
  fn numeric_values_must_fit_their_type() {
    assert_eq!(parse_value::<u32>("UPSTREAM_MAX_RETRIES", " 3 "), Ok(3));
    assert!(parse_value::<u32>("UPSTREAM_MAX_RETRIES", "4294967296").is_err());
    assert!(parse_value::<u64>("HANDSHAKE_TTL_SECS", "-1").is_err());
    assert_eq!(parse_value::<u64>("SYNC_INTERVAL_SECS", "0"), Ok(0));
  }
}
