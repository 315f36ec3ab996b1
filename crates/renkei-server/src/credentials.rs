//! Handlers for claim credentials: invitation issuance/revocation on the
//! staff surface, check-in token issuance, and patient-side redemption.
//!
//! | Method   | Path | Auth | Notes |
//! |----------|------|------|-------|
//! | `POST`   | `/api/invitations` | Basic | Body: [`InvitationBody`]; idempotent per patient |
//! | `GET`    | `/api/invitations` | Basic | `?patient_id=` required |
//! | `DELETE` | `/api/invitations/{id}` | Basic | Revoke (flip to `expired`); 204 |
//! | `POST`   | `/api/checkin-tokens` | Basic | Body: [`CheckinTokenBody`]; returns 201 + credential |
//! | `POST`   | `/checkin` | none | Body: `{"token":"..."}`; consumes the token |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use renkei_core::{
  credential::ClaimCredential,
  gateway::MessagingGateway,
  issuer::CheckinOutcome,
  store::ClinicStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, auth::Authenticated, error::ApiError};

// ─── Invitations ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InvitationBody {
  pub patient_id: Uuid,
  pub clinic_id:  Uuid,
  /// Lifetime override in days; defaults server-side.
  pub ttl_days:   Option<i64>,
  /// Operator identifier recorded on the credential.
  pub issued_by:  Option<String>,
}

/// `POST /api/invitations` — returns 201 with `reused = true` when an
/// unexpired active invitation already existed for the patient.
pub async fn issue_invitation<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Json(body): Json<InvitationBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let issued = state
    .issuer
    .issue_invitation(body.patient_id, body.clinic_id, body.ttl_days, body.issued_by)
    .await?;
  Ok((StatusCode::CREATED, Json(issued)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub patient_id: Uuid,
}

/// `GET /api/invitations?patient_id=<id>` — every invitation ever issued to
/// the patient, newest first.
pub async fn list_invitations<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ClaimCredential>>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let invitations =
    state.issuer.invitations_for_patient(params.patient_id).await?;
  Ok(Json(invitations))
}

/// `DELETE /api/invitations/{id}` — revoke. Already-expired is a no-op 204;
/// already-used is a 409.
pub async fn revoke_invitation<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  state.issuer.revoke(id).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Check-in tokens ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CheckinTokenBody {
  pub patient_id:          Uuid,
  pub clinic_id:           Uuid,
  /// The account the QR code will be shown to.
  pub external_account_id: String,
  /// Lifetime override in minutes; defaults server-side.
  pub ttl_minutes:         Option<i64>,
}

/// `POST /api/checkin-tokens` — mint a short-lived check-in token. The
/// credential's `value` is what gets rendered into the QR code.
pub async fn issue_checkin_token<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Json(body): Json<CheckinTokenBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let credential = state
    .issuer
    .issue_checkin_token(
      body.patient_id,
      body.clinic_id,
      &body.external_account_id,
      body.ttl_minutes,
    )
    .await?;
  Ok((StatusCode::CREATED, Json(credential)))
}

// ─── Redemption ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RedeemBody {
  pub token: String,
}

/// `POST /checkin` — redeem a scanned token. The token is consumed even when
/// no appointment exists today; the outcome is tagged so the caller can word
/// the two cases differently.
pub async fn redeem_checkin<S, G>(
  State(state): State<AppState<S, G>>,
  Json(body): Json<RedeemBody>,
) -> Result<Json<CheckinOutcome>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let outcome = state.issuer.redeem_checkin(&body.token, Utc::now()).await?;
  Ok(Json(outcome))
}
