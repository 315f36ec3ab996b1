//! The delivery dispatcher — drains due notification schedules on each
//! externally-triggered tick.
//!
//! Each schedule is claimed with a compare-and-swap before any delivery
//! work, so overlapping ticks cannot double-send; the loser of a claim
//! simply skips the row. Failures are isolated per schedule: the batch
//! always runs to completion and reports an aggregate summary.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  gateway::{MessagingGateway, OutboundMessage},
  schedule::{DeliveryFailure, DeliveryRecord, NotificationSchedule},
  store::ClinicStore,
  template::{self, RenderContext},
};

// ─── Options & summary ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
  /// How far ahead of `now` a schedule may sit and still be picked up this
  /// tick. Matches the external trigger cadence.
  pub window:      Duration,
  /// Failed attempts allowed before a schedule goes terminally `failed`.
  pub max_retries: u32,
}

impl Default for DispatchOptions {
  fn default() -> Self {
    Self { window: Duration::minutes(5), max_retries: 3 }
  }
}

/// What one tick did. `total` counts every due schedule the tick saw;
/// schedules skipped over (undeliverable channel, lost claim) appear in
/// neither `sent` nor `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
  pub total:  u64,
  pub sent:   u64,
  pub failed: u64,
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct Dispatcher<S, G> {
  store:   Arc<S>,
  gateway: Arc<G>,
  options: DispatchOptions,
}

impl<S, G> Dispatcher<S, G>
where
  S: ClinicStore,
  G: MessagingGateway,
{
  pub fn new(store: Arc<S>, gateway: Arc<G>, options: DispatchOptions) -> Self {
    Self { store, gateway, options }
  }

  /// Run one dispatch tick over `[now, now + window]`.
  ///
  /// Errors out only when the due-schedule query itself fails; everything
  /// per-schedule is absorbed into the summary.
  pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<DispatchSummary> {
    let due = self
      .store
      .due_schedules(now, now + self.options.window)
      .await
      .map_err(Error::store)?;

    let mut summary =
      DispatchSummary { total: due.len() as u64, ..Default::default() };

    for schedule in due {
      if !schedule.channel.is_dispatchable() {
        tracing::debug!(
          schedule_id = %schedule.id,
          channel = schedule.channel.discriminant(),
          "channel not deliverable, leaving scheduled"
        );
        continue;
      }

      match self.store.claim_for_sending(schedule.id, now).await {
        Ok(true) => {}
        Ok(false) => {
          tracing::debug!(
            schedule_id = %schedule.id,
            "claim lost, another tick owns this schedule"
          );
          continue;
        }
        Err(err) => {
          tracing::warn!(schedule_id = %schedule.id, %err, "claim query failed");
          continue;
        }
      }

      match self.deliver(&schedule, now).await {
        Ok(()) => {
          summary.sent += 1;
          tracing::info!(
            schedule_id = %schedule.id,
            patient_id = %schedule.patient_id,
            "notification sent"
          );
        }
        Err(err) => {
          summary.failed += 1;
          self.record_failure(&schedule, &err, now).await;
        }
      }
    }

    tracing::info!(
      total = summary.total,
      sent = summary.sent,
      failed = summary.failed,
      "dispatch tick complete"
    );
    Ok(summary)
  }

  /// Deliver one claimed schedule: resolve the recipient, render the body,
  /// push, then finish the bookkeeping.
  async fn deliver(
    &self,
    schedule: &NotificationSchedule,
    now: DateTime<Utc>,
  ) -> Result<()> {
    let link = self
      .store
      .primary_link_for_patient(schedule.patient_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NoLinkedAccount(schedule.patient_id))?;

    let body = self.render_body(schedule, now).await?;
    self
      .gateway
      .send_message(&link.external_account_id, &OutboundMessage::text(body))
      .await?;

    // The message is out; bookkeeping problems past this point are logged,
    // not turned into a retry that would double-send.
    if !self
      .store
      .mark_sent(schedule.id, now)
      .await
      .map_err(Error::store)?
    {
      tracing::warn!(
        schedule_id = %schedule.id,
        "schedule left sending state before mark_sent"
      );
    }
    let record = DeliveryRecord::for_delivery(schedule, now);
    if let Err(err) = self.store.append_delivery_record(record).await {
      tracing::warn!(
        schedule_id = %schedule.id,
        %err,
        "failed to append delivery record"
      );
    }
    Ok(())
  }

  /// The message body: the clinic's template for the notification type when
  /// one is configured, otherwise the schedule's own message, with
  /// placeholder substitution applied either way.
  async fn render_body(
    &self,
    schedule: &NotificationSchedule,
    now: DateTime<Utc>,
  ) -> Result<String> {
    let patient = self
      .store
      .get_patient(schedule.patient_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PatientNotFound(schedule.patient_id))?;
    let clinic_name = self
      .store
      .get_clinic(schedule.clinic_id)
      .await
      .map_err(Error::store)?
      .map(|c| c.name)
      .unwrap_or_default();
    let template = self
      .store
      .template_for(schedule.clinic_id, schedule.notification_type)
      .await
      .map_err(Error::store)?;

    let source = match template {
      Some(t) => t.body,
      None => schedule.message.clone(),
    };
    let ctx = RenderContext {
      patient_name: patient.display_name(),
      clinic_name,
      send_date: Some(now),
    };
    Ok(template::render(&source, &ctx))
  }

  /// Release the claim after a failed attempt and append the failure log
  /// row. Never propagates; the batch must continue.
  async fn record_failure(
    &self,
    schedule: &NotificationSchedule,
    err: &Error,
    now: DateTime<Utc>,
  ) {
    let reason = err.to_string();
    let outcome = match self
      .store
      .release_after_failure(
        schedule.id,
        reason.clone(),
        self.options.max_retries,
        now,
      )
      .await
    {
      Ok(Some(outcome)) => outcome,
      Ok(None) => {
        tracing::warn!(
          schedule_id = %schedule.id,
          "failed schedule was not in sending state at release"
        );
        return;
      }
      Err(release_err) => {
        tracing::error!(
          schedule_id = %schedule.id,
          %release_err,
          "could not release schedule after failure"
        );
        return;
      }
    };

    tracing::warn!(
      schedule_id = %schedule.id,
      patient_id = %schedule.patient_id,
      retry_count = outcome.retry_count,
      status = outcome.status.discriminant(),
      %reason,
      "notification delivery failed"
    );

    let failure = DeliveryFailure {
      id: Uuid::new_v4(),
      schedule_id: schedule.id,
      clinic_id: schedule.clinic_id,
      patient_id: schedule.patient_id,
      channel: schedule.channel,
      reason,
      is_retryable: outcome.retry_count < self.options.max_retries,
      failed_at: now,
    };
    if let Err(err) = self.store.append_delivery_failure(failure).await {
      tracing::warn!(
        schedule_id = %schedule.id,
        %err,
        "failed to append delivery failure log"
      );
    }
  }
}
