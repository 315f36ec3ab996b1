//! Notification schedules — persisted future send intents — and the
//! append-only delivery bookkeeping records written by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Type & channel ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
  PeriodicCheckup,
  TreatmentReminder,
  AppointmentReminder,
  AppointmentChange,
  Custom,
}

impl NotificationType {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::PeriodicCheckup => "periodic_checkup",
      Self::TreatmentReminder => "treatment_reminder",
      Self::AppointmentReminder => "appointment_reminder",
      Self::AppointmentChange => "appointment_change",
      Self::Custom => "custom",
    }
  }
}

/// Delivery channel. Only [`Channel::Platform`] is wired to the dispatcher;
/// email and SMS schedules are skipped (left `scheduled`) for manual or
/// future handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
  Platform,
  Email,
  Sms,
}

impl Channel {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Platform => "platform",
      Self::Email => "email",
      Self::Sms => "sms",
    }
  }

  /// Whether the delivery dispatcher can currently deliver on this channel.
  pub fn is_dispatchable(&self) -> bool {
    matches!(self, Self::Platform)
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Schedule lifecycle.
///
/// `scheduled → sending → {sent | scheduled | failed}` and
/// `scheduled → cancelled`. `Sending` is the transient claimed state held by
/// exactly one dispatcher tick; a retryable failure releases the schedule
/// back to `Scheduled`. `Sent`, `Failed`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
  Scheduled,
  Sending,
  Sent,
  Failed,
  Cancelled,
}

impl ScheduleStatus {
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Scheduled => "scheduled",
      Self::Sending => "sending",
      Self::Sent => "sent",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
  }
}

// ─── NotificationSchedule ────────────────────────────────────────────────────

/// One persisted send intent. Never deleted; terminal rows are the delivery
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSchedule {
  pub id:                     Uuid,
  pub clinic_id:              Uuid,
  pub patient_id:             Uuid,
  pub notification_type:      NotificationType,
  pub channel:                Channel,
  /// Custom body used when no template matches `notification_type`.
  pub message:                String,
  pub template_ref:           Option<String>,
  pub send_at:                DateTime<Utc>,
  pub status:                 ScheduleStatus,
  /// Only ever increases; `Failed` requires it to have reached the
  /// dispatcher's retry ceiling.
  pub retry_count:            u32,
  pub failure_reason:         Option<String>,
  pub sent_at:                Option<DateTime<Utc>>,
  pub auto_send:              bool,
  /// Ordinal position within the patient's recurring reminder cycle; `None`
  /// for anything that is not an auto-reminder.
  pub auto_reminder_sequence: Option<u32>,
  pub created_at:             DateTime<Utc>,
  pub updated_at:             DateTime<Utc>,
}

/// Input to [`crate::scheduler::Scheduler::schedule`]. Status, retry count,
/// and timestamps are set by the scheduler, not accepted from callers.
#[derive(Debug, Clone)]
pub struct NewSchedule {
  pub clinic_id:              Uuid,
  pub patient_id:             Uuid,
  pub notification_type:      NotificationType,
  pub channel:                Channel,
  pub message:                String,
  pub template_ref:           Option<String>,
  pub send_at:                DateTime<Utc>,
  pub auto_send:              bool,
  pub auto_reminder_sequence: Option<u32>,
}

// ─── Delivery bookkeeping ────────────────────────────────────────────────────

/// One failed delivery attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailure {
  pub id:           Uuid,
  pub schedule_id:  Uuid,
  pub clinic_id:    Uuid,
  pub patient_id:   Uuid,
  pub channel:      Channel,
  pub reason:       String,
  /// Whether the attempt left the schedule eligible for another tick
  /// (`retry_count` still below the ceiling).
  pub is_retryable: bool,
  pub failed_at:    DateTime<Utc>,
}

/// One successful delivery, for analytics. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
  pub id:          Uuid,
  pub schedule_id: Uuid,
  pub clinic_id:   Uuid,
  pub patient_id:  Uuid,
  pub channel:     Channel,
  pub sent_at:     DateTime<Utc>,
  pub hour_of_day: u8,
  pub day_of_week: u8,
}

impl DeliveryRecord {
  /// Build the analytics record for a schedule delivered at `sent_at`.
  pub fn for_delivery(
    schedule: &NotificationSchedule,
    sent_at: DateTime<Utc>,
  ) -> Self {
    use chrono::{Datelike as _, Timelike as _};
    Self {
      id: Uuid::new_v4(),
      schedule_id: schedule.id,
      clinic_id: schedule.clinic_id,
      patient_id: schedule.patient_id,
      channel: schedule.channel,
      sent_at,
      hour_of_day: sent_at.hour() as u8,
      day_of_week: sent_at.weekday().num_days_from_sunday() as u8,
    }
  }
}
