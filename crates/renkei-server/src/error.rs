//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use renkei_core::Error as CoreError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Basic-auth failure on the staff surface.
  #[error("unauthorized")]
  Unauthorized,

  /// Bearer-secret failure on the dispatch trigger.
  #[error("unauthorized")]
  CronUnauthorized,

  #[error(transparent)]
  Domain(#[from] CoreError),
}

/// Domain-to-HTTP mapping. Conflicts with current state (already linked,
/// already used, bad transition, incomplete config) are 409; an expired
/// credential is 410 so clients can tell "ask for a fresh one" apart from
/// "this never existed". An identity-proof mismatch reads as "no matching
/// patient" and must not disclose which patient numbers exist, hence 404.
fn domain_status(err: &CoreError) -> StatusCode {
  match err {
    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
    CoreError::PatientNotFound(_)
    | CoreError::LinkNotFound
    | CoreError::ScheduleNotFound(_)
    | CoreError::CredentialNotFound
    | CoreError::IdentityMismatch => StatusCode::NOT_FOUND,
    CoreError::AlreadyLinked { .. }
    | CoreError::CredentialAlreadyUsed
    | CoreError::InvalidTransition { .. }
    | CoreError::ConfigMissing(_)
    | CoreError::NoLinkedAccount(_) => StatusCode::CONFLICT,
    CoreError::CredentialExpired => StatusCode::GONE,
    CoreError::IssuanceExhausted => StatusCode::SERVICE_UNAVAILABLE,
    CoreError::Gateway(_) => StatusCode::BAD_GATEWAY,
    CoreError::Store(_) | CoreError::Serialization(_) => {
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, challenge) = match &self {
      ApiError::Unauthorized => {
        (StatusCode::UNAUTHORIZED, Some("Basic realm=\"renkei\""))
      }
      ApiError::CronUnauthorized => (StatusCode::UNAUTHORIZED, Some("Bearer")),
      ApiError::Domain(err) => (domain_status(err), None),
    };

    if status.is_server_error() {
      tracing::error!(%status, error = %self, "request failed");
    }

    let mut res =
      (status, Json(json!({ "error": self.to_string() }))).into_response();
    if let Some(challenge) = challenge {
      res
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    }
    res
  }
}
