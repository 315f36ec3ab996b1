//! Error types for `renkei-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation error: {0}")]
  Validation(String),

  #[error("patient not found: {0}")]
  PatientNotFound(Uuid),

  #[error("link not found")]
  LinkNotFound,

  #[error("schedule not found: {0}")]
  ScheduleNotFound(Uuid),

  /// The schedule is no longer in a state that permits the requested
  /// transition (e.g. cancelling a sent schedule).
  #[error("schedule {schedule_id} is {status} and cannot transition")]
  InvalidTransition {
    schedule_id: Uuid,
    status:      &'static str,
  },

  /// The credential value does not match any row. The value itself is a
  /// secret and is never echoed back.
  #[error("credential not found")]
  CredentialNotFound,

  #[error("credential expired")]
  CredentialExpired,

  #[error("credential already used")]
  CredentialAlreadyUsed,

  /// Ten consecutive generated values collided with live credentials.
  #[error("credential issuance exhausted after repeated value collisions")]
  IssuanceExhausted,

  /// Supplied identity details do not match the patient directory.
  #[error("identity mismatch")]
  IdentityMismatch,

  #[error("account {external_account_id} is already linked to patient {patient_id}")]
  AlreadyLinked {
    external_account_id: String,
    patient_id:          Uuid,
  },

  /// The clinic's menu assignment config is absent or incomplete.
  #[error("menu assignment config missing for clinic {0}")]
  ConfigMissing(Uuid),

  /// The patient has no primary linked external account to deliver to.
  #[error("no linked account for patient {0}")]
  NoLinkedAccount(Uuid),

  #[error("gateway error: {0}")]
  Gateway(#[from] GatewayError),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a storage-backend error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
