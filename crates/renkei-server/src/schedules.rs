//! Handlers for notification schedules.
//!
//! | Method | Path | Auth | Notes |
//! |--------|------|------|-------|
//! | `POST` | `/api/schedules` | Basic | Body: [`NewScheduleBody`]; returns 201 + schedule |
//! | `GET`  | `/api/schedules` | Basic | `?patient_id=` required; newest first |
//! | `POST` | `/api/schedules/{id}/cancel` | Basic | Only `scheduled` rows; 409 otherwise |
//! | `POST` | `/api/schedules/cancel-auto` | Basic | Body: `{"patient_id":...}`; resets the reminder cycle |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use renkei_core::{
  gateway::MessagingGateway,
  schedule::{Channel, NewSchedule, NotificationSchedule, NotificationType},
  store::ClinicStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, auth::Authenticated, error::ApiError};

// ─── Create ──────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /api/schedules`.
#[derive(Debug, Deserialize)]
pub struct NewScheduleBody {
  pub clinic_id:         Uuid,
  pub patient_id:        Uuid,
  pub notification_type: NotificationType,
  #[serde(default)]
  pub channel:           Option<Channel>,
  #[serde(default)]
  pub message:           String,
  pub template_ref:      Option<String>,
  pub send_at:           DateTime<Utc>,
  /// Defaults to `true`; `false` parks the schedule for manual sending.
  #[serde(default = "default_auto_send")]
  pub auto_send:         bool,
}

fn default_auto_send() -> bool {
  true
}

impl From<NewScheduleBody> for NewSchedule {
  fn from(b: NewScheduleBody) -> Self {
    NewSchedule {
      clinic_id:              b.clinic_id,
      patient_id:             b.patient_id,
      notification_type:      b.notification_type,
      channel:                b.channel.unwrap_or(Channel::Platform),
      message:                b.message,
      template_ref:           b.template_ref,
      send_at:                b.send_at,
      auto_send:              b.auto_send,
      // Reminder sequencing is owned by the evaluator, never by callers.
      auto_reminder_sequence: None,
    }
  }
}

/// `POST /api/schedules` — returns 201 + the stored schedule.
pub async fn create<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Json(body): Json<NewScheduleBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let schedule = state.scheduler.schedule(NewSchedule::from(body)).await?;
  Ok((StatusCode::CREATED, Json(schedule)))
}

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub patient_id: Uuid,
}

/// `GET /api/schedules?patient_id=<id>`
pub async fn list<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<NotificationSchedule>>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let schedules = state.scheduler.for_patient(params.patient_id).await?;
  Ok(Json(schedules))
}

// ─── Cancel ──────────────────────────────────────────────────────────────────

/// `POST /api/schedules/{id}/cancel` — returns the cancelled schedule.
pub async fn cancel<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(id): Path<Uuid>,
) -> Result<Json<NotificationSchedule>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let schedule = state.scheduler.cancel(id).await?;
  Ok(Json(schedule))
}

#[derive(Debug, Deserialize)]
pub struct CancelAutoBody {
  pub patient_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CancelAutoResponse {
  pub cancelled: u64,
}

/// `POST /api/schedules/cancel-auto` — called by the booking collaborator
/// when a patient makes a new appointment; pending auto-reminders are
/// cancelled so the cycle restarts from the new visit.
pub async fn cancel_auto<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Json(body): Json<CancelAutoBody>,
) -> Result<Json<CancelAutoResponse>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let cancelled = state.scheduler.cancel_auto_reminders(body.patient_id).await?;
  Ok(Json(CancelAutoResponse { cancelled }))
}
