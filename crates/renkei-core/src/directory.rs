//! Collaborator records consumed by this core: the patient directory,
//! appointments, message templates, and the per-clinic menu assignment.
//!
//! CRUD over these entities belongs to the wider practice-management
//! platform; here they are read (and minimally written — check-in marks an
//! appointment, operators seed menu refs) through [`crate::store::ClinicStore`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::NotificationType;

// ─── Clinic & patient ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
  pub id:   Uuid,
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
  pub id:             Uuid,
  pub clinic_id:      Uuid,
  /// The number printed on the patient's registration card; unique per
  /// clinic, entered by the patient during directory-proof linking.
  pub patient_number: String,
  pub family_name:    String,
  pub given_name:     String,
  pub birth_date:     NaiveDate,
}

impl Patient {
  pub fn display_name(&self) -> String {
    format!("{} {}", self.family_name, self.given_name)
  }
}

/// Collapse a birthdate as entered by a user into the canonical 8-digit form
/// used for identity comparison: `YYYYMMDD`, digits only.
///
/// Accepts `1990-01-23`, `1990/01/23`, `19900123`, and the same with stray
/// whitespace. Returns `None` when what remains is not exactly 8 digits.
pub fn normalize_birthdate(input: &str) -> Option<String> {
  let digits: String = input.chars().filter(char::is_ascii_digit).collect();
  (digits.len() == 8).then_some(digits)
}

/// The canonical 8-digit form of a stored birthdate.
pub fn birthdate_key(date: NaiveDate) -> String {
  date.format("%Y%m%d").to_string()
}

// ─── Appointment ─────────────────────────────────────────────────────────────

/// How a check-in was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInMethod {
  QrCode,
  Manual,
}

impl CheckInMethod {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::QrCode => "qr_code",
      Self::Manual => "manual",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
  pub id:              Uuid,
  pub clinic_id:       Uuid,
  pub patient_id:      Uuid,
  pub start_at:        DateTime<Utc>,
  pub checked_in_at:   Option<DateTime<Utc>>,
  pub check_in_method: Option<CheckInMethod>,
}

// ─── Message template ────────────────────────────────────────────────────────

/// A notification body with `{placeholder}` substitution slots, looked up by
/// clinic and notification type at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
  pub id:                Uuid,
  pub clinic_id:         Uuid,
  pub notification_type: NotificationType,
  pub body:              String,
}

// ─── Menu assignment ─────────────────────────────────────────────────────────

/// Which platform menu each linkage state maps to for a clinic.
///
/// Written by clinic administration; read-only to this core. Both refs must
/// be present for the synchronizer to act.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuAssignment {
  pub clinic_id:         Uuid,
  pub linked_menu_ref:   Option<String>,
  pub unlinked_menu_ref: Option<String>,
  pub updated_at:        DateTime<Utc>,
}

impl MenuAssignment {
  /// Both refs present — the synchronizer can act.
  pub fn is_complete(&self) -> bool {
    self.linked_menu_ref.is_some() && self.unlinked_menu_ref.is_some()
  }
}
