//! Notification scheduling: manual schedules, recurring auto-reminder
//! evaluation, and cancellation, plus the per-clinic reminder rules.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use uuid::Uuid;

use crate::{
  Error, Result,
  reminder::AutoReminderRule,
  schedule::{
    Channel, NewSchedule, NotificationSchedule, NotificationType,
    ScheduleStatus,
  },
  store::ClinicStore,
};

/// How many days past its exact offset a visit can still earn a reminder.
/// Covers evaluation cadences up to weekly.
pub const REMINDER_GRACE_DAYS: i64 = 7;

/// Body used for emitted reminders when the clinic has no
/// `periodic_checkup` template configured at send time.
pub const DEFAULT_REMINDER_MESSAGE: &str =
  "定期検診の時期になりました。ご予約をお願いいたします。";

pub struct Scheduler<S> {
  store: Arc<S>,
}

impl<S: ClinicStore> Scheduler<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  /// Persist a new schedule in the `scheduled` state.
  pub async fn schedule(
    &self,
    new: NewSchedule,
  ) -> Result<NotificationSchedule> {
    if new.message.trim().is_empty() && new.template_ref.is_none() {
      return Err(Error::Validation(
        "either message or template_ref is required".into(),
      ));
    }
    let patient = self
      .store
      .get_patient(new.patient_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PatientNotFound(new.patient_id))?;
    if patient.clinic_id != new.clinic_id {
      return Err(Error::Validation(
        "patient does not belong to the clinic".into(),
      ));
    }

    let now = Utc::now();
    let schedule = NotificationSchedule {
      id: Uuid::new_v4(),
      clinic_id: new.clinic_id,
      patient_id: new.patient_id,
      notification_type: new.notification_type,
      channel: new.channel,
      message: new.message,
      template_ref: new.template_ref,
      send_at: new.send_at,
      status: ScheduleStatus::Scheduled,
      retry_count: 0,
      failure_reason: None,
      sent_at: None,
      auto_send: new.auto_send,
      auto_reminder_sequence: new.auto_reminder_sequence,
      created_at: now,
      updated_at: now,
    };
    self
      .store
      .insert_schedule(schedule.clone())
      .await
      .map_err(Error::store)?;

    tracing::info!(
      schedule_id = %schedule.id,
      patient_id = %schedule.patient_id,
      notification_type = schedule.notification_type.discriminant(),
      send_at = %schedule.send_at,
      "notification scheduled"
    );
    Ok(schedule)
  }

  pub async fn get(&self, id: Uuid) -> Result<NotificationSchedule> {
    self
      .store
      .get_schedule(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::ScheduleNotFound(id))
  }

  pub async fn for_patient(
    &self,
    patient_id: Uuid,
  ) -> Result<Vec<NotificationSchedule>> {
    self
      .store
      .schedules_for_patient(patient_id)
      .await
      .map_err(Error::store)
  }

  /// Cancel one schedule. Only `scheduled` rows can be cancelled; anything
  /// already claimed by a dispatcher tick or terminal is reported as an
  /// invalid transition with its current status.
  pub async fn cancel(&self, schedule_id: Uuid) -> Result<NotificationSchedule> {
    if !self
      .store
      .cancel_schedule(schedule_id, Utc::now())
      .await
      .map_err(Error::store)?
    {
      let current = self.get(schedule_id).await?;
      return Err(Error::InvalidTransition {
        schedule_id,
        status: current.status.discriminant(),
      });
    }
    tracing::info!(%schedule_id, "schedule cancelled");
    self.get(schedule_id).await
  }

  /// Reset the patient's reminder cycle by cancelling every pending
  /// auto-reminder schedule. The external booking collaborator calls this
  /// whenever a new appointment is made.
  pub async fn cancel_auto_reminders(&self, patient_id: Uuid) -> Result<u64> {
    let cancelled = self
      .store
      .cancel_auto_reminders(patient_id, Utc::now())
      .await
      .map_err(Error::store)?;
    if cancelled > 0 {
      tracing::info!(%patient_id, cancelled, "auto reminders reset");
    }
    Ok(cancelled)
  }

  /// The clinic's reminder rule, or the disabled default when nobody has
  /// configured one yet.
  pub async fn reminder_rule(&self, clinic_id: Uuid) -> Result<AutoReminderRule> {
    Ok(
      self
        .store
        .reminder_rule(clinic_id)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| AutoReminderRule::default_for(clinic_id)),
    )
  }

  pub async fn upsert_reminder_rule(
    &self,
    mut rule: AutoReminderRule,
  ) -> Result<AutoReminderRule> {
    rule.validate().map_err(Error::Validation)?;
    rule.updated_at = Utc::now();
    self
      .store
      .upsert_reminder_rule(rule.clone())
      .await
      .map_err(Error::store)?;
    tracing::info!(
      clinic_id = %rule.clinic_id,
      enabled = rule.enabled,
      intervals = rule.intervals.len(),
      "reminder rule updated"
    );
    Ok(rule)
  }

  /// Detect patients due for a recurring reminder and persist one schedule
  /// per match.
  ///
  /// A patient qualifies for the k-th interval when their **last**
  /// appointment falls in that interval's lookback window (which also rules
  /// out future bookings) and no open schedule exists for that window's
  /// sequence number. Emitted schedules take the patient's next sequence
  /// number and a `send_at` of the following day at the clinic's default
  /// send hour.
  pub async fn evaluate_auto_reminders(
    &self,
    clinic_id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<Vec<NotificationSchedule>> {
    let rule = self.reminder_rule(clinic_id).await?;
    if !rule.enabled || rule.intervals.is_empty() {
      return Ok(Vec::new());
    }

    let send_at = next_day_send_at(now, rule.default_send_hour);
    let mut created = Vec::new();
    for window in
      rule.lookback_windows(now, Duration::days(REMINDER_GRACE_DAYS))
    {
      let candidates = self
        .store
        .reminder_candidates(clinic_id, window.from, window.to)
        .await
        .map_err(Error::store)?;
      for candidate in candidates {
        if self
          .store
          .has_open_reminder(candidate.patient_id, window.sequence)
          .await
          .map_err(Error::store)?
        {
          continue;
        }
        let sequence = self
          .store
          .max_reminder_sequence(candidate.patient_id)
          .await
          .map_err(Error::store)?
          .map_or(1, |max| max + 1);

        let schedule = NotificationSchedule {
          id: Uuid::new_v4(),
          clinic_id,
          patient_id: candidate.patient_id,
          notification_type: NotificationType::PeriodicCheckup,
          channel: Channel::Platform,
          message: DEFAULT_REMINDER_MESSAGE.to_string(),
          template_ref: None,
          send_at,
          status: ScheduleStatus::Scheduled,
          retry_count: 0,
          failure_reason: None,
          sent_at: None,
          auto_send: true,
          auto_reminder_sequence: Some(sequence),
          created_at: now,
          updated_at: now,
        };
        self
          .store
          .insert_schedule(schedule.clone())
          .await
          .map_err(Error::store)?;
        tracing::debug!(
          patient_id = %candidate.patient_id,
          sequence,
          interval = window.sequence,
          "auto reminder emitted"
        );
        created.push(schedule);
      }
    }

    if !created.is_empty() {
      tracing::info!(
        %clinic_id,
        count = created.len(),
        "auto reminders scheduled"
      );
    }
    Ok(created)
  }
}

/// The following day at `hour`:00 UTC.
fn next_day_send_at(now: DateTime<Utc>, hour: u8) -> DateTime<Utc> {
  let time =
    NaiveTime::from_hms_opt(u32::from(hour), 0, 0).unwrap_or(NaiveTime::MIN);
  (now.date_naive() + Duration::days(1)).and_time(time).and_utc()
}
