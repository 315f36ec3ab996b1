//! Claim credentials — short-lived, single-use secrets that authorize
//! creating a linkage (invitation codes) or performing a check-in
//! (point-of-care tokens).
//!
//! Credentials are never physically deleted; terminal rows are kept for
//! audit. Status transitions are monotonic: `active → used` or
//! `active → expired`, never back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Kind & status ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
  /// Staff-issued linkage invitation, default TTL 30 days.
  Invitation,
  /// Point-of-care check-in token, default TTL 5 minutes.
  Checkin,
}

impl CredentialKind {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Invitation => "invitation",
      Self::Checkin => "checkin",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
  Active,
  Used,
  Expired,
}

impl CredentialStatus {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Used => "used",
      Self::Expired => "expired",
    }
  }

  /// Terminal statuses can never transition again.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Used | Self::Expired)
  }
}

// ─── Check-in payload ────────────────────────────────────────────────────────

/// Denormalized claim payload embedded in a check-in token, rendered by the
/// caller as a scannable code. Carries everything the scanning side needs
/// without a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinPayload {
  pub patient_id:          Uuid,
  pub clinic_id:           Uuid,
  pub external_account_id: String,
  pub token:               String,
  pub issued_at:           DateTime<Utc>,
  pub expires_at:          DateTime<Utc>,
}

// ─── ClaimCredential ─────────────────────────────────────────────────────────

/// A single claim credential row.
///
/// `value` is unique among rows whose status is not terminal; two expired
/// credentials may share a value, an expired and an active one may not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimCredential {
  pub id:                  Uuid,
  pub clinic_id:           Uuid,
  pub patient_id:          Uuid,
  /// Present on check-in tokens (the scanning account is fixed at mint
  /// time), absent on invitations.
  pub external_account_id: Option<String>,
  pub value:               String,
  pub kind:                CredentialKind,
  pub payload:             Option<CheckinPayload>,
  pub status:              CredentialStatus,
  pub expires_at:          DateTime<Utc>,
  pub created_by:          Option<String>,
  pub created_at:          DateTime<Utc>,
  pub used_at:             Option<DateTime<Utc>>,
}

impl ClaimCredential {
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }
}

// ─── Invitation code format ──────────────────────────────────────────────────

/// Charset for invitation codes: uppercase alphanumerics with the easily
/// confused O/0/I/1 removed. 32 characters, so 8 characters carry 40 bits.
pub const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated invitation code.
pub const CODE_LEN: usize = 8;

/// Normalize user input for an invitation code: trim, uppercase, and strip
/// the separators people type or codes are displayed with.
pub fn normalize_code(input: &str) -> String {
  input
    .trim()
    .chars()
    .filter(|c| !c.is_whitespace() && *c != '-')
    .map(|c| c.to_ascii_uppercase())
    .collect()
}

/// Whether a normalized string is a well-formed invitation code.
pub fn is_valid_code(code: &str) -> bool {
  code.len() == CODE_LEN
    && code.bytes().all(|b| CODE_CHARSET.contains(&b))
}
