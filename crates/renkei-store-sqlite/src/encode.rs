//! Decoding helpers between the plain-text representations stored in SQLite
//! columns and the `renkei-core` domain types.
//!
//! All timestamps are stored as RFC 3339 strings, birthdates as `YYYY-MM-DD`,
//! UUIDs as hyphenated lowercase strings, and enums as the discriminant
//! strings the core types define (encoding therefore goes through
//! `discriminant()` directly; this module holds the inverse direction plus
//! the raw row types).

use chrono::{DateTime, NaiveDate, Utc};
use renkei_core::{
  credential::{ClaimCredential, CredentialKind, CredentialStatus},
  directory::{Appointment, CheckInMethod, MenuAssignment, MessageTemplate, Patient},
  link::{AccountLink, LinkEvent, LinkEventKind, Relationship},
  reminder::AutoReminderRule,
  schedule::{
    Channel, DeliveryFailure, NotificationSchedule, NotificationType,
    ScheduleStatus,
  },
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> / NaiveDate ───────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(date: NaiveDate) -> String {
  date.format("%Y-%m-%d").to_string()
}

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enum decoders ───────────────────────────────────────────────────────────

pub fn decode_credential_kind(s: &str) -> Result<CredentialKind> {
  match s {
    "invitation" => Ok(CredentialKind::Invitation),
    "checkin" => Ok(CredentialKind::Checkin),
    other => Err(Error::Decode(format!("unknown credential kind: {other:?}"))),
  }
}

pub fn decode_credential_status(s: &str) -> Result<CredentialStatus> {
  match s {
    // Rows written by earlier revisions used 'pending' for freshly issued
    // credentials; it reads back as a synonym for 'active'.
    "active" | "pending" => Ok(CredentialStatus::Active),
    "used" => Ok(CredentialStatus::Used),
    "expired" => Ok(CredentialStatus::Expired),
    other => {
      Err(Error::Decode(format!("unknown credential status: {other:?}")))
    }
  }
}

pub fn decode_relationship(s: &str) -> Result<Relationship> {
  match s {
    "self" => Ok(Relationship::Myself),
    "spouse" => Ok(Relationship::Spouse),
    "child" => Ok(Relationship::Child),
    "parent" => Ok(Relationship::Parent),
    "other" => Ok(Relationship::Other),
    other => Err(Error::Decode(format!("unknown relationship: {other:?}"))),
  }
}

pub fn decode_link_event_kind(s: &str) -> Result<LinkEventKind> {
  match s {
    "linked" => Ok(LinkEventKind::Linked),
    "unlinked" => Ok(LinkEventKind::Unlinked),
    "selected" => Ok(LinkEventKind::Selected),
    other => Err(Error::Decode(format!("unknown link event kind: {other:?}"))),
  }
}

pub fn decode_check_in_method(s: &str) -> Result<CheckInMethod> {
  match s {
    "qr_code" => Ok(CheckInMethod::QrCode),
    "manual" => Ok(CheckInMethod::Manual),
    other => Err(Error::Decode(format!("unknown check-in method: {other:?}"))),
  }
}

pub fn decode_notification_type(s: &str) -> Result<NotificationType> {
  match s {
    "periodic_checkup" => Ok(NotificationType::PeriodicCheckup),
    "treatment_reminder" => Ok(NotificationType::TreatmentReminder),
    "appointment_reminder" => Ok(NotificationType::AppointmentReminder),
    "appointment_change" => Ok(NotificationType::AppointmentChange),
    "custom" => Ok(NotificationType::Custom),
    other => {
      Err(Error::Decode(format!("unknown notification type: {other:?}")))
    }
  }
}

pub fn decode_channel(s: &str) -> Result<Channel> {
  match s {
    "platform" => Ok(Channel::Platform),
    "email" => Ok(Channel::Email),
    "sms" => Ok(Channel::Sms),
    other => Err(Error::Decode(format!("unknown channel: {other:?}"))),
  }
}

pub fn decode_schedule_status(s: &str) -> Result<ScheduleStatus> {
  match s {
    "scheduled" => Ok(ScheduleStatus::Scheduled),
    "sending" => Ok(ScheduleStatus::Sending),
    "sent" => Ok(ScheduleStatus::Sent),
    "failed" => Ok(ScheduleStatus::Failed),
    "cancelled" => Ok(ScheduleStatus::Cancelled),
    other => Err(Error::Decode(format!("unknown schedule status: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw columns from an `account_links` row.
pub struct RawAccountLink {
  pub link_id:             String,
  pub clinic_id:           String,
  pub external_account_id: String,
  pub patient_id:          String,
  pub relationship:        String,
  pub nickname:            Option<String>,
  pub is_primary:          bool,
  pub linked_at:           String,
  pub last_selected_at:    Option<String>,
}

impl RawAccountLink {
  pub fn into_link(self) -> Result<AccountLink> {
    Ok(AccountLink {
      id: decode_uuid(&self.link_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      external_account_id: self.external_account_id,
      patient_id: decode_uuid(&self.patient_id)?,
      relationship: decode_relationship(&self.relationship)?,
      nickname: self.nickname,
      is_primary: self.is_primary,
      linked_at: decode_dt(&self.linked_at)?,
      last_selected_at: self
        .last_selected_at
        .as_deref()
        .map(decode_dt)
        .transpose()?,
    })
  }
}

/// Raw columns from a `link_events` row.
pub struct RawLinkEvent {
  pub event_id:            String,
  pub link_id:             String,
  pub clinic_id:           String,
  pub external_account_id: String,
  pub patient_id:          String,
  pub kind:                String,
  pub recorded_at:         String,
}

impl RawLinkEvent {
  pub fn into_event(self) -> Result<LinkEvent> {
    Ok(LinkEvent {
      id: decode_uuid(&self.event_id)?,
      link_id: decode_uuid(&self.link_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      external_account_id: self.external_account_id,
      patient_id: decode_uuid(&self.patient_id)?,
      kind: decode_link_event_kind(&self.kind)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

/// Raw columns from a `claim_credentials` row.
pub struct RawCredential {
  pub credential_id:       String,
  pub clinic_id:           String,
  pub patient_id:          String,
  pub external_account_id: Option<String>,
  pub value:               String,
  pub kind:                String,
  pub payload_json:        Option<String>,
  pub status:              String,
  pub expires_at:          String,
  pub created_by:          Option<String>,
  pub created_at:          String,
  pub used_at:             Option<String>,
}

impl RawCredential {
  pub fn into_credential(self) -> Result<ClaimCredential> {
    let payload = self
      .payload_json
      .as_deref()
      .map(serde_json::from_str)
      .transpose()?;
    Ok(ClaimCredential {
      id: decode_uuid(&self.credential_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      patient_id: decode_uuid(&self.patient_id)?,
      external_account_id: self.external_account_id,
      value: self.value,
      kind: decode_credential_kind(&self.kind)?,
      payload,
      status: decode_credential_status(&self.status)?,
      expires_at: decode_dt(&self.expires_at)?,
      created_by: self.created_by,
      created_at: decode_dt(&self.created_at)?,
      used_at: self.used_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw columns from a `notification_schedules` row.
pub struct RawSchedule {
  pub schedule_id:            String,
  pub clinic_id:              String,
  pub patient_id:             String,
  pub notification_type:      String,
  pub channel:                String,
  pub message:                String,
  pub template_ref:           Option<String>,
  pub send_at:                String,
  pub status:                 String,
  pub retry_count:            i64,
  pub failure_reason:         Option<String>,
  pub sent_at:                Option<String>,
  pub auto_send:              bool,
  pub auto_reminder_sequence: Option<i64>,
  pub created_at:             String,
  pub updated_at:             String,
}

impl RawSchedule {
  pub fn into_schedule(self) -> Result<NotificationSchedule> {
    Ok(NotificationSchedule {
      id: decode_uuid(&self.schedule_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      patient_id: decode_uuid(&self.patient_id)?,
      notification_type: decode_notification_type(&self.notification_type)?,
      channel: decode_channel(&self.channel)?,
      message: self.message,
      template_ref: self.template_ref,
      send_at: decode_dt(&self.send_at)?,
      status: decode_schedule_status(&self.status)?,
      retry_count: self.retry_count as u32,
      failure_reason: self.failure_reason,
      sent_at: self.sent_at.as_deref().map(decode_dt).transpose()?,
      auto_send: self.auto_send,
      auto_reminder_sequence: self.auto_reminder_sequence.map(|s| s as u32),
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw columns from a `patients` row.
pub struct RawPatient {
  pub patient_id:     String,
  pub clinic_id:      String,
  pub patient_number: String,
  pub family_name:    String,
  pub given_name:     String,
  pub birth_date:     String,
}

impl RawPatient {
  pub fn into_patient(self) -> Result<Patient> {
    Ok(Patient {
      id: decode_uuid(&self.patient_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      patient_number: self.patient_number,
      family_name: self.family_name,
      given_name: self.given_name,
      birth_date: decode_date(&self.birth_date)?,
    })
  }
}

/// Raw columns from an `appointments` row.
pub struct RawAppointment {
  pub appointment_id:  String,
  pub clinic_id:       String,
  pub patient_id:      String,
  pub start_at:        String,
  pub checked_in_at:   Option<String>,
  pub check_in_method: Option<String>,
}

impl RawAppointment {
  pub fn into_appointment(self) -> Result<Appointment> {
    Ok(Appointment {
      id: decode_uuid(&self.appointment_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      patient_id: decode_uuid(&self.patient_id)?,
      start_at: decode_dt(&self.start_at)?,
      checked_in_at: self.checked_in_at.as_deref().map(decode_dt).transpose()?,
      check_in_method: self
        .check_in_method
        .as_deref()
        .map(decode_check_in_method)
        .transpose()?,
    })
  }
}

/// Raw columns from a `menu_assignments` row.
pub struct RawMenuAssignment {
  pub clinic_id:         String,
  pub linked_menu_ref:   Option<String>,
  pub unlinked_menu_ref: Option<String>,
  pub updated_at:        String,
}

impl RawMenuAssignment {
  pub fn into_assignment(self) -> Result<MenuAssignment> {
    Ok(MenuAssignment {
      clinic_id: decode_uuid(&self.clinic_id)?,
      linked_menu_ref: self.linked_menu_ref,
      unlinked_menu_ref: self.unlinked_menu_ref,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw columns from an `auto_reminder_rules` row.
pub struct RawReminderRule {
  pub clinic_id:         String,
  pub enabled:           bool,
  pub intervals_json:    String,
  pub default_send_hour: i64,
  pub updated_at:        String,
}

impl RawReminderRule {
  pub fn into_rule(self) -> Result<AutoReminderRule> {
    Ok(AutoReminderRule {
      clinic_id: decode_uuid(&self.clinic_id)?,
      enabled: self.enabled,
      intervals: serde_json::from_str(&self.intervals_json)?,
      default_send_hour: self.default_send_hour as u8,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw columns from a `delivery_failures` row.
pub struct RawDeliveryFailure {
  pub failure_id:   String,
  pub schedule_id:  String,
  pub clinic_id:    String,
  pub patient_id:   String,
  pub channel:      String,
  pub reason:       String,
  pub is_retryable: bool,
  pub failed_at:    String,
}

impl RawDeliveryFailure {
  pub fn into_failure(self) -> Result<DeliveryFailure> {
    Ok(DeliveryFailure {
      id: decode_uuid(&self.failure_id)?,
      schedule_id: decode_uuid(&self.schedule_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      patient_id: decode_uuid(&self.patient_id)?,
      channel: decode_channel(&self.channel)?,
      reason: self.reason,
      is_retryable: self.is_retryable,
      failed_at: decode_dt(&self.failed_at)?,
    })
  }
}

/// Raw columns from a `message_templates` row.
pub struct RawTemplate {
  pub template_id:       String,
  pub clinic_id:         String,
  pub notification_type: String,
  pub body:              String,
}

impl RawTemplate {
  pub fn into_template(self) -> Result<MessageTemplate> {
    Ok(MessageTemplate {
      id: decode_uuid(&self.template_id)?,
      clinic_id: decode_uuid(&self.clinic_id)?,
      notification_type: decode_notification_type(&self.notification_type)?,
      body: self.body,
    })
  }
}
