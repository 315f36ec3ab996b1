//! HTTP Basic-auth extractor for the staff surface and the bearer-secret
//! check for the dispatch trigger.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use renkei_core::{gateway::MessagingGateway, store::ClinicStore};

use crate::{AppState, error::ApiError};

/// The staff credentials every `/api` route is checked against.
#[derive(Clone)]
pub struct AuthConfig {
  pub username:      String,
  /// argon2 PHC string (`$argon2id$v=19$…`); generate with `--hash-password`.
  pub password_hash: String,
}

/// Zero-size marker: present in the handler means the request was
/// authenticated as staff.
pub struct Authenticated;

/// Verify staff Basic-auth credentials directly from headers.
pub fn verify_auth(
  headers: &HeaderMap,
  config: &AuthConfig,
) -> Result<(), ApiError> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(ApiError::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
  let creds =
    std::str::from_utf8(&decoded).map_err(|_| ApiError::Unauthorized)?;

  let (username, password) =
    creds.split_once(':').ok_or(ApiError::Unauthorized)?;

  if username != config.username {
    return Err(ApiError::Unauthorized);
  }

  let parsed_hash = PasswordHash::new(&config.password_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Ok(())
}

/// Verify the shared bearer secret presented by the external scheduler.
pub fn verify_cron(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::CronUnauthorized)?;

  let presented = header_val
    .strip_prefix("Bearer ")
    .ok_or(ApiError::CronUnauthorized)?;

  if presented != secret {
    return Err(ApiError::CronUnauthorized);
  }
  Ok(())
}

impl<S, G> FromRequestParts<AppState<S, G>> for Authenticated
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, G>,
  ) -> Result<Self, Self::Rejection> {
    verify_auth(&parts.headers, &state.auth)?;
    Ok(Authenticated)
  }
}
