//! Account links — the association between an external messaging-platform
//! account and a clinic patient record.
//!
//! A link is the single source of "is this account currently linked". Every
//! mutation additionally appends a [`LinkEvent`] to an append-only audit log
//! keyed by link id; the link row itself is deleted on unlink, the audit
//! trail is not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Relationship ────────────────────────────────────────────────────────────

/// Who the linked patient is relative to the account holder.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
  /// The account holder is the patient.
  #[default]
  #[serde(rename = "self")]
  Myself,
  Spouse,
  Child,
  Parent,
  Other,
}

impl Relationship {
  /// The discriminant string stored in the `relationship` column.
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Myself => "self",
      Self::Spouse => "spouse",
      Self::Child => "child",
      Self::Parent => "parent",
      Self::Other => "other",
    }
  }
}

// ─── AccountLink ─────────────────────────────────────────────────────────────

/// A live connection between an external account and a patient record.
///
/// Unique on (external_account_id, patient_id). Exactly one link per external
/// account carries `is_primary = true`, set only when it is the first link
/// created for that account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLink {
  pub id:                  Uuid,
  pub clinic_id:           Uuid,
  pub external_account_id: String,
  pub patient_id:          Uuid,
  pub relationship:        Relationship,
  pub nickname:            Option<String>,
  pub is_primary:          bool,
  pub linked_at:           DateTime<Utc>,
  /// Ephemeral UI context only; updated by patient selection, never part of
  /// ownership semantics.
  pub last_selected_at:    Option<DateTime<Utc>>,
}

// ─── Audit log ───────────────────────────────────────────────────────────────

/// What happened to a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkEventKind {
  Linked,
  Unlinked,
  Selected,
}

impl LinkEventKind {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Linked => "linked",
      Self::Unlinked => "unlinked",
      Self::Selected => "selected",
    }
  }
}

/// One append-only audit record. Never updated, never deleted; survives the
/// deletion of the link row it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEvent {
  pub id:                  Uuid,
  pub link_id:             Uuid,
  pub clinic_id:           Uuid,
  pub external_account_id: String,
  pub patient_id:          Uuid,
  pub kind:                LinkEventKind,
  pub recorded_at:         DateTime<Utc>,
}

impl LinkEvent {
  /// Build the audit record for a mutation of `link` happening now.
  pub fn record(link: &AccountLink, kind: LinkEventKind) -> Self {
    Self {
      id: Uuid::new_v4(),
      link_id: link.id,
      clinic_id: link.clinic_id,
      external_account_id: link.external_account_id.clone(),
      patient_id: link.patient_id,
      kind,
      recorded_at: Utc::now(),
    }
  }
}
