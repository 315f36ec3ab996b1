//! Handlers for per-clinic auto-reminder rules and the evaluation trigger.
//!
//! | Method | Path | Auth | Notes |
//! |--------|------|------|-------|
//! | `GET`  | `/api/clinics/{id}/reminder-rule` | Basic | Disabled default when unconfigured |
//! | `PUT`  | `/api/clinics/{id}/reminder-rule` | Basic | Body: [`RuleBody`] |
//! | `POST` | `/api/clinics/{id}/evaluate-reminders` | Basic | Returns the schedules created |

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::Utc;
use renkei_core::{
  gateway::MessagingGateway,
  reminder::{AutoReminderRule, ReminderInterval},
  schedule::NotificationSchedule,
  store::ClinicStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, auth::Authenticated, error::ApiError};

/// `GET /api/clinics/{id}/reminder-rule`
pub async fn get_rule<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(clinic_id): Path<Uuid>,
) -> Result<Json<AutoReminderRule>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let rule = state.scheduler.reminder_rule(clinic_id).await?;
  Ok(Json(rule))
}

/// JSON body accepted by `PUT /api/clinics/{id}/reminder-rule`. The clinic
/// comes from the path; `updated_at` is set server-side.
#[derive(Debug, Deserialize)]
pub struct RuleBody {
  pub enabled:           bool,
  pub intervals:         Vec<ReminderInterval>,
  pub default_send_hour: u8,
}

/// `PUT /api/clinics/{id}/reminder-rule` — validates and upserts.
pub async fn put_rule<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(clinic_id): Path<Uuid>,
  Json(body): Json<RuleBody>,
) -> Result<Json<AutoReminderRule>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let rule = AutoReminderRule {
    clinic_id,
    enabled: body.enabled,
    intervals: body.intervals,
    default_send_hour: body.default_send_hour,
    updated_at: Utc::now(),
  };
  let stored = state.scheduler.upsert_reminder_rule(rule).await?;
  Ok(Json(stored))
}

/// `POST /api/clinics/{id}/evaluate-reminders` — run one evaluation pass for
/// the clinic and return the schedules it emitted. Invoked by an external
/// scheduler on a daily-to-weekly cadence.
pub async fn evaluate<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(clinic_id): Path<Uuid>,
) -> Result<Json<Vec<NotificationSchedule>>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let created =
    state.scheduler.evaluate_auto_reminders(clinic_id, Utc::now()).await?;
  Ok(Json(created))
}
