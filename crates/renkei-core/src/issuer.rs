//! The Credential Issuer — mints and redeems claim credentials.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore as _};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  credential::{
    CODE_CHARSET, CODE_LEN, CheckinPayload, ClaimCredential, CredentialKind,
    CredentialStatus, is_valid_code, normalize_code,
  },
  directory::{Appointment, CheckInMethod, Patient},
  store::ClinicStore,
};

/// Default invitation lifetime.
pub const DEFAULT_INVITATION_TTL_DAYS: i64 = 30;

/// Default check-in token lifetime.
pub const DEFAULT_CHECKIN_TTL_MINUTES: i64 = 5;

/// Generation attempts before giving up on a unique value.
const MAX_GENERATION_ATTEMPTS: usize = 10;

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of [`CredentialIssuer::issue_invitation`].
#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvitation {
  pub credential: ClaimCredential,
  /// True when an unexpired active invitation already existed and was
  /// returned unchanged instead of minting a duplicate.
  pub reused:     bool,
}

/// Result of a successful check-in redemption.
///
/// `NoAppointmentToday` is terminal but expected: the token is consumed
/// either way, and callers present it differently from a credential failure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckinOutcome {
  CheckedIn {
    patient:     Patient,
    appointment: Appointment,
  },
  NoAppointmentToday {
    patient: Patient,
  },
}

// ─── Issuer ──────────────────────────────────────────────────────────────────

/// Mints single-use, time-limited claim credentials and drives their
/// redemption.
pub struct CredentialIssuer<S> {
  store: Arc<S>,
}

impl<S: ClinicStore> CredentialIssuer<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  // ── Issuance ──────────────────────────────────────────────────────────

  /// Issue (or idempotently reuse) a linkage invitation for a patient.
  pub async fn issue_invitation(
    &self,
    patient_id: Uuid,
    clinic_id: Uuid,
    ttl_days: Option<i64>,
    issued_by: Option<String>,
  ) -> Result<IssuedInvitation> {
    let now = Utc::now();
    self.check_patient(patient_id, clinic_id).await?;

    if let Some(existing) = self
      .store
      .active_invitation_for_patient(patient_id, now)
      .await
      .map_err(Error::store)?
    {
      tracing::debug!(%patient_id, credential_id = %existing.id, "reusing active invitation");
      return Ok(IssuedInvitation { credential: existing, reused: true });
    }

    let ttl = ttl_days.unwrap_or(DEFAULT_INVITATION_TTL_DAYS);
    if ttl <= 0 {
      return Err(Error::Validation("ttl_days must be positive".into()));
    }

    let value = self.unique_value(generate_code).await?;
    let credential = ClaimCredential {
      id: Uuid::new_v4(),
      clinic_id,
      patient_id,
      external_account_id: None,
      value,
      kind: CredentialKind::Invitation,
      payload: None,
      status: CredentialStatus::Active,
      expires_at: now + Duration::days(ttl),
      created_by: issued_by,
      created_at: now,
      used_at: None,
    };

    self
      .store
      .insert_credential(credential.clone())
      .await
      .map_err(Error::store)?;

    tracing::info!(%patient_id, credential_id = %credential.id, "issued invitation");
    Ok(IssuedInvitation { credential, reused: false })
  }

  /// Mint a short-TTL check-in token carrying a denormalized claim payload.
  pub async fn issue_checkin_token(
    &self,
    patient_id: Uuid,
    clinic_id: Uuid,
    external_account_id: &str,
    ttl_minutes: Option<i64>,
  ) -> Result<ClaimCredential> {
    let now = Utc::now();
    self.check_patient(patient_id, clinic_id).await?;

    let ttl = ttl_minutes.unwrap_or(DEFAULT_CHECKIN_TTL_MINUTES);
    if ttl <= 0 {
      return Err(Error::Validation("ttl_minutes must be positive".into()));
    }

    let value = self.unique_value(generate_token).await?;
    let expires_at = now + Duration::minutes(ttl);
    let credential = ClaimCredential {
      id: Uuid::new_v4(),
      clinic_id,
      patient_id,
      external_account_id: Some(external_account_id.to_string()),
      value: value.clone(),
      kind: CredentialKind::Checkin,
      payload: Some(CheckinPayload {
        patient_id,
        clinic_id,
        external_account_id: external_account_id.to_string(),
        token: value,
        issued_at: now,
        expires_at,
      }),
      status: CredentialStatus::Active,
      expires_at,
      created_by: None,
      created_at: now,
      used_at: None,
    };

    self
      .store
      .insert_credential(credential.clone())
      .await
      .map_err(Error::store)?;

    tracing::info!(%patient_id, credential_id = %credential.id, "issued check-in token");
    Ok(credential)
  }

  // ── Redemption ────────────────────────────────────────────────────────

  /// Look up an invitation by code and verify it is redeemable, without
  /// consuming it. The Linkage Manager consumes it only after all of its
  /// own checks pass.
  pub async fn validate_invitation(
    &self,
    code: &str,
    now: DateTime<Utc>,
  ) -> Result<ClaimCredential> {
    let normalized = normalize_code(code);
    if !is_valid_code(&normalized) {
      return Err(Error::Validation("malformed invitation code".into()));
    }

    let credential = self.lookup_live(&normalized, now).await?;
    if credential.kind != CredentialKind::Invitation {
      return Err(Error::CredentialNotFound);
    }
    Ok(credential)
  }

  /// Redeem a check-in token.
  ///
  /// The token is consumed even when the patient has no appointment today;
  /// rescanning a token that failed to find an appointment must not succeed
  /// a second time.
  pub async fn redeem_checkin(
    &self,
    value: &str,
    now: DateTime<Utc>,
  ) -> Result<CheckinOutcome> {
    let credential = self.lookup_live(value, now).await?;
    if credential.kind != CredentialKind::Checkin {
      return Err(Error::CredentialNotFound);
    }

    let patient = self
      .store
      .get_patient(credential.patient_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PatientNotFound(credential.patient_id))?;

    let day_start = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
    let day_end = day_start + Duration::days(1);
    let appointment = self
      .store
      .earliest_appointment_between(patient.id, day_start, day_end)
      .await
      .map_err(Error::store)?;

    // Single-redemption gate: exactly one concurrent scan wins this swap.
    let consumed = self
      .store
      .consume_credential(credential.id, now)
      .await
      .map_err(Error::store)?;
    if !consumed {
      return Err(Error::CredentialAlreadyUsed);
    }

    match appointment {
      None => {
        tracing::info!(
          patient_id = %patient.id,
          credential_id = %credential.id,
          "check-in token consumed with no appointment today"
        );
        Ok(CheckinOutcome::NoAppointmentToday { patient })
      }
      Some(mut appointment) => {
        self
          .store
          .mark_checked_in(appointment.id, now, CheckInMethod::QrCode)
          .await
          .map_err(Error::store)?;
        appointment.checked_in_at = Some(now);
        appointment.check_in_method = Some(CheckInMethod::QrCode);

        tracing::info!(
          patient_id = %patient.id,
          appointment_id = %appointment.id,
          "checked in via token"
        );
        Ok(CheckinOutcome::CheckedIn { patient, appointment })
      }
    }
  }

  /// CAS-consume a validated credential. Surfaces `CredentialAlreadyUsed`
  /// when a concurrent redemption won the race.
  pub async fn consume(
    &self,
    credential_id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<()> {
    let consumed = self
      .store
      .consume_credential(credential_id, now)
      .await
      .map_err(Error::store)?;
    if consumed {
      Ok(())
    } else {
      Err(Error::CredentialAlreadyUsed)
    }
  }

  // ── Staff operations ──────────────────────────────────────────────────

  pub async fn invitations_for_patient(
    &self,
    patient_id: Uuid,
  ) -> Result<Vec<ClaimCredential>> {
    self
      .store
      .credentials_for_patient(patient_id, CredentialKind::Invitation)
      .await
      .map_err(Error::store)
  }

  /// Revoke an active credential (flip to `expired`).
  pub async fn revoke(&self, credential_id: Uuid) -> Result<()> {
    let credential = self
      .store
      .get_credential(credential_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::CredentialNotFound)?;

    match credential.status {
      CredentialStatus::Used => Err(Error::CredentialAlreadyUsed),
      CredentialStatus::Expired => Ok(()),
      CredentialStatus::Active => {
        self
          .store
          .expire_credential(credential_id)
          .await
          .map_err(Error::store)?;
        tracing::info!(%credential_id, "revoked credential");
        Ok(())
      }
    }
  }

  // ── Internals ─────────────────────────────────────────────────────────

  async fn check_patient(&self, patient_id: Uuid, clinic_id: Uuid) -> Result<Patient> {
    let patient = self
      .store
      .get_patient(patient_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PatientNotFound(patient_id))?;
    if patient.clinic_id != clinic_id {
      return Err(Error::Validation(
        "patient does not belong to the clinic".into(),
      ));
    }
    Ok(patient)
  }

  /// Fetch by exact value and verify liveness, opportunistically flipping
  /// rows whose wall-clock expiry has passed.
  async fn lookup_live(
    &self,
    value: &str,
    now: DateTime<Utc>,
  ) -> Result<ClaimCredential> {
    let credential = self
      .store
      .credential_by_value(value)
      .await
      .map_err(Error::store)?
      .ok_or(Error::CredentialNotFound)?;

    match credential.status {
      CredentialStatus::Used => return Err(Error::CredentialAlreadyUsed),
      CredentialStatus::Expired => return Err(Error::CredentialExpired),
      CredentialStatus::Active => {}
    }

    if credential.is_expired_at(now) {
      // Best effort; a lost swap means a concurrent call already finalized
      // the row, and the credential is unusable either way.
      let _ = self
        .store
        .expire_credential(credential.id)
        .await
        .map_err(Error::store)?;
      return Err(Error::CredentialExpired);
    }

    Ok(credential)
  }

  /// Generate with `make` until the value has no live collision, up to the
  /// attempt ceiling.
  async fn unique_value(&self, make: fn() -> String) -> Result<String> {
    for _ in 0..MAX_GENERATION_ATTEMPTS {
      let value = make();
      let collides = self
        .store
        .value_in_use(&value)
        .await
        .map_err(Error::store)?;
      if !collides {
        return Ok(value);
      }
    }
    Err(Error::IssuanceExhausted)
  }
}

// ─── Value generation ────────────────────────────────────────────────────────

/// An 8-character invitation code over the unambiguous charset. The charset
/// length divides 2^32, so the modulo is unbiased.
pub fn generate_code() -> String {
  let mut rng = OsRng;
  (0..CODE_LEN)
    .map(|_| {
      let idx = rng.next_u32() as usize % CODE_CHARSET.len();
      CODE_CHARSET[idx] as char
    })
    .collect()
}

/// A check-in token: 32 random bytes, base64url without padding.
pub fn generate_token() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  URL_SAFE_NO_PAD.encode(bytes)
}
