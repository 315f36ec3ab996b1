//! The `ClinicStore` trait and supporting result types.
//!
//! The trait is implemented by storage backends (e.g. `renkei-store-sqlite`).
//! Services in this crate and the HTTP layer depend on this abstraction, not
//! on any concrete backend.
//!
//! Conditional transitions (credential consumption, schedule claiming) are
//! expressed as compare-and-swap operations returning whether the swap won;
//! backends must make the status check and the transition atomic with
//! respect to concurrent callers.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  credential::{ClaimCredential, CredentialKind},
  directory::{Appointment, CheckInMethod, Clinic, MenuAssignment, MessageTemplate, Patient},
  link::{AccountLink, LinkEvent},
  reminder::AutoReminderRule,
  schedule::{
    DeliveryFailure, DeliveryRecord, NotificationSchedule, NotificationType,
    ScheduleStatus,
  },
};

// ─── Result types ────────────────────────────────────────────────────────────

/// Outcome of releasing a `sending` schedule after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
  /// The retry count after the increment.
  pub retry_count: u32,
  /// `Scheduled` when another tick may retry, `Failed` once the ceiling is
  /// reached.
  pub status:      ScheduleStatus,
}

/// A patient matched by an auto-reminder lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderCandidate {
  pub patient_id:          Uuid,
  pub last_appointment_at: DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the linkage/notification store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (tokio with `axum`).
pub trait ClinicStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Account links ─────────────────────────────────────────────────────

  /// Persist a fully-built link. Fails on a duplicate
  /// (external_account_id, patient_id) pair.
  fn insert_link(
    &self,
    link: AccountLink,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_link(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<AccountLink>, Self::Error>> + Send + '_;

  fn find_link<'a>(
    &'a self,
    external_account_id: &'a str,
    patient_id: Uuid,
  ) -> impl Future<Output = Result<Option<AccountLink>, Self::Error>> + Send + 'a;

  fn links_for_account<'a>(
    &'a self,
    external_account_id: &'a str,
  ) -> impl Future<Output = Result<Vec<AccountLink>, Self::Error>> + Send + 'a;

  fn links_for_patient(
    &self,
    patient_id: Uuid,
  ) -> impl Future<Output = Result<Vec<AccountLink>, Self::Error>> + Send + '_;

  /// The patient's delivery link: an `is_primary` link when the patient has
  /// one, otherwise the earliest surviving link. `None` only when the
  /// patient has no links at all.
  fn primary_link_for_patient(
    &self,
    patient_id: Uuid,
  ) -> impl Future<Output = Result<Option<AccountLink>, Self::Error>> + Send + '_;

  fn count_links_for_account<'a>(
    &'a self,
    external_account_id: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Delete a link row. Returns whether a row was deleted.
  fn delete_link(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Update `last_selected_at` only. Returns whether the link exists.
  fn touch_link_selected(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Distinct external accounts holding at least one link under the clinic.
  fn linked_accounts_for_clinic(
    &self,
    clinic_id: Uuid,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  // ── Link audit log (append-only) ──────────────────────────────────────

  fn append_link_event(
    &self,
    event: LinkEvent,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn link_events(
    &self,
    link_id: Uuid,
  ) -> impl Future<Output = Result<Vec<LinkEvent>, Self::Error>> + Send + '_;

  // ── Claim credentials ─────────────────────────────────────────────────

  fn insert_credential(
    &self,
    credential: ClaimCredential,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_credential(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ClaimCredential>, Self::Error>> + Send + '_;

  /// Exact-value lookup, any status.
  fn credential_by_value<'a>(
    &'a self,
    value: &'a str,
  ) -> impl Future<Output = Result<Option<ClaimCredential>, Self::Error>> + Send + 'a;

  /// Whether `value` collides with any non-terminal credential.
  fn value_in_use<'a>(
    &'a self,
    value: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// The patient's unexpired `active` invitation, if one exists — the
  /// idempotent-reuse lookup.
  fn active_invitation_for_patient(
    &self,
    patient_id: Uuid,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<ClaimCredential>, Self::Error>> + Send + '_;

  /// CAS `active → used`, stamping `used_at`. Returns whether this caller
  /// won the transition.
  fn consume_credential(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// CAS `active → expired`. Returns whether this caller won the
  /// transition.
  fn expire_credential(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn credentials_for_patient(
    &self,
    patient_id: Uuid,
    kind: CredentialKind,
  ) -> impl Future<Output = Result<Vec<ClaimCredential>, Self::Error>> + Send + '_;

  // ── Menu assignment ───────────────────────────────────────────────────

  fn menu_assignment(
    &self,
    clinic_id: Uuid,
  ) -> impl Future<Output = Result<Option<MenuAssignment>, Self::Error>> + Send + '_;

  fn upsert_menu_assignment(
    &self,
    assignment: MenuAssignment,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Notification schedules ────────────────────────────────────────────

  fn insert_schedule(
    &self,
    schedule: NotificationSchedule,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_schedule(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<NotificationSchedule>, Self::Error>> + Send + '_;

  /// Schedules with `status = scheduled`, `auto_send = true`, and `send_at`
  /// within `[from, to]`, ordered by `send_at`.
  fn due_schedules(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<NotificationSchedule>, Self::Error>> + Send + '_;

  /// CAS `scheduled → sending`. Exactly one concurrent caller wins; losers
  /// must leave the schedule alone.
  fn claim_for_sending(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// CAS `sending → sent`, stamping `sent_at`.
  fn mark_sent(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Release a `sending` schedule after a failed attempt: increment
  /// `retry_count`, record `reason`, and move to `failed` once the new
  /// count reaches `max_retries`, otherwise back to `scheduled`.
  ///
  /// Returns `None` when the schedule is missing or not in `sending`.
  fn release_after_failure(
    &self,
    id: Uuid,
    reason: String,
    max_retries: u32,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<ReleaseOutcome>, Self::Error>> + Send + '_;

  /// CAS `scheduled → cancelled`.
  fn cancel_schedule(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Cancel the patient's pending auto-reminder schedules (`scheduled`,
  /// `auto_send`, sequence non-null). Returns how many rows transitioned.
  fn cancel_auto_reminders(
    &self,
    patient_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn schedules_for_patient(
    &self,
    patient_id: Uuid,
  ) -> impl Future<Output = Result<Vec<NotificationSchedule>, Self::Error>> + Send + '_;

  /// Highest `auto_reminder_sequence` ever recorded for the patient, any
  /// status.
  fn max_reminder_sequence(
    &self,
    patient_id: Uuid,
  ) -> impl Future<Output = Result<Option<u32>, Self::Error>> + Send + '_;

  /// Whether the patient has a non-terminal schedule for this sequence
  /// number.
  fn has_open_reminder(
    &self,
    patient_id: Uuid,
    sequence: u32,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Auto-reminder rules ───────────────────────────────────────────────

  fn reminder_rule(
    &self,
    clinic_id: Uuid,
  ) -> impl Future<Output = Result<Option<AutoReminderRule>, Self::Error>> + Send + '_;

  fn upsert_reminder_rule(
    &self,
    rule: AutoReminderRule,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Delivery bookkeeping (append-only) ────────────────────────────────

  fn append_delivery_failure(
    &self,
    failure: DeliveryFailure,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn failures_for_schedule(
    &self,
    schedule_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DeliveryFailure>, Self::Error>> + Send + '_;

  fn append_delivery_record(
    &self,
    record: DeliveryRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Collaborator directory ────────────────────────────────────────────

  fn insert_clinic(
    &self,
    clinic: Clinic,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_clinic(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Clinic>, Self::Error>> + Send + '_;

  fn insert_patient(
    &self,
    patient: Patient,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_patient(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Patient>, Self::Error>> + Send + '_;

  fn find_patient_by_number<'a>(
    &'a self,
    clinic_id: Uuid,
    patient_number: &'a str,
  ) -> impl Future<Output = Result<Option<Patient>, Self::Error>> + Send + 'a;

  fn insert_appointment(
    &self,
    appointment: Appointment,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The patient's earliest appointment starting within `[from, to)` —
  /// "today's appointment" when the range covers the local day.
  fn earliest_appointment_between(
    &self,
    patient_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Appointment>, Self::Error>> + Send + '_;

  /// Stamp an appointment checked-in. Returns whether the row exists and
  /// was not already checked in.
  fn mark_checked_in(
    &self,
    appointment_id: Uuid,
    at: DateTime<Utc>,
    method: CheckInMethod,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Patients of the clinic whose **last** appointment starts within
  /// `[from, to]`. A last appointment in a past window implies no future
  /// appointment exists.
  fn reminder_candidates(
    &self,
    clinic_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<ReminderCandidate>, Self::Error>> + Send + '_;

  fn insert_template(
    &self,
    template: MessageTemplate,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn template_for(
    &self,
    clinic_id: Uuid,
    notification_type: NotificationType,
  ) -> impl Future<Output = Result<Option<MessageTemplate>, Self::Error>> + Send + '_;
}
