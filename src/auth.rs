use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Name of both the header and the cookie carrying the session token
pub const SESSION_COOKIE: &str = "Authorization";

/// Session tokens live for 30 days; there is no refresh path
pub const SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 30;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
  alg: String,
  typ: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
  /// User id
  pub sub: String,
  pub exp: i64,
  pub iat: i64,
}

impl Claims {
  pub fn user_id(&self) -> Result<i64, AppError> {
    self.sub
      .parse()
      .map_err(|_| AppError::Authentication("invalid subject".to_string()))
  }
}

/// Issues and verifies HMAC-SHA256 signed session tokens
#[derive(Clone)]
pub struct SessionKeys {
  key: hmac::Key,
}

impl SessionKeys {
  pub fn new(secret: &[u8]) -> Self {
    Self {
      key: hmac::Key::new(hmac::HMAC_SHA256, secret),
    }
  }

  pub fn issue(&self, user_id: i64, now: i64) -> Result<String, AppError> {
    let header = Header { alg: ALGORITHM.to_string(), typ: "JWT".to_string() };
    let claims = Claims {
      sub: user_id.to_string(),
      exp: now + SESSION_TTL_SECS,
      iat: now,
    };

    let header = serde_json::to_vec(&header).map_err(|e| AppError::Internal(e.to_string()))?;
    let claims = serde_json::to_vec(&claims).map_err(|e| AppError::Internal(e.to_string()))?;
    let signing_input = format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(claims));
    let tag = hmac::sign(&self.key, signing_input.as_bytes());

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(tag.as_ref())))
  }

  /// Verify signature, algorithm and expiry
  pub fn validate(&self, token: &str, now: i64) -> Result<Claims, AppError> {
    let invalid = || AppError::Authentication("invalid session token".to_string());

    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
      (parts.next(), parts.next(), parts.next(), parts.next())
    else {
      return Err(invalid());
    };

    let header: Header = URL_SAFE_NO_PAD
      .decode(header_b64)
      .ok()
      .and_then(|raw| serde_json::from_slice(&raw).ok())
      .ok_or_else(invalid)?;
    if header.alg != ALGORITHM {
      return Err(AppError::Authentication(format!("unexpected signing method: {}", header.alg)));
    }

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| invalid())?;
    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    hmac::verify(&self.key, signing_input.as_bytes(), &signature).map_err(|_| invalid())?;

    let claims: Claims = URL_SAFE_NO_PAD
      .decode(claims_b64)
      .ok()
      .and_then(|raw| serde_json::from_slice(&raw).ok())
      .ok_or_else(invalid)?;

    if now >= claims.exp {
      return Err(AppError::Authentication("session expired".to_string()));
    }

    Ok(claims)
  }
}

/// Extract token from Authorization: Bearer <token> header
pub fn extract_token_from_header(auth_header: &str) -> Option<String> {
  let token = auth_header
    .strip_prefix("Bearer ")
    .unwrap_or(auth_header)
    .trim();
  (!token.is_empty()).then(|| token.to_string())
}

/// Session token from the Authorization header, falling back to the cookie
pub fn session_token(headers: &HeaderMap) -> Option<String> {
  if let Some(token) = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(extract_token_from_header)
  {
    return Some(token);
  }

  headers
    .get_all(header::COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(';'))
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(name, _)| *name == SESSION_COOKIE)
    .map(|(_, value)| value.to_string())
    .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str) -> String {
  format!(
    "{}={}; Max-Age={}; Path=/; SameSite=Lax; HttpOnly",
    SESSION_COOKIE, token, SESSION_TTL_SECS
  )
}

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
  bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
  bcrypt::verify(password, hash)
}
