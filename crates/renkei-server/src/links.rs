//! Handlers for account↔patient links.
//!
//! | Method   | Path | Auth | Notes |
//! |----------|------|------|-------|
//! | `POST`   | `/links` | none | Body: [`LinkRequest`]; proof-authorized; returns 201 + link |
//! | `POST`   | `/links/select` | none | Body: [`SelectBody`]; marks the acting patient |
//! | `GET`    | `/api/links` | Basic | Exactly one of `?external_account_id=`, `?patient_id=` |
//! | `DELETE` | `/api/links/{id}` | Basic | Returns the [`UnlinkReceipt`] |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use renkei_core::{
  Error as CoreError,
  gateway::MessagingGateway,
  link::AccountLink,
  linkage::{LinkRequest, UnlinkReceipt},
  store::ClinicStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, auth::Authenticated, error::ApiError};

// ─── Patient-side ────────────────────────────────────────────────────────────

/// `POST /links` — create a link from an identity proof. No Basic auth: the
/// proof inside the body is the authorization.
pub async fn create<S, G>(
  State(state): State<AppState<S, G>>,
  Json(body): Json<LinkRequest>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let link = state.linkage.link(body).await?;
  Ok((StatusCode::CREATED, Json(link)))
}

#[derive(Debug, Deserialize)]
pub struct SelectBody {
  pub external_account_id: String,
  pub patient_id:          Uuid,
}

/// `POST /links/select` — record which linked patient the account is acting
/// as. Ephemeral UI context; 404 when no such link exists.
pub async fn select<S, G>(
  State(state): State<AppState<S, G>>,
  Json(body): Json<SelectBody>,
) -> Result<Json<AccountLink>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let link = state
    .linkage
    .select_patient(&body.external_account_id, body.patient_id)
    .await?;
  Ok(Json(link))
}

// ─── Staff ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub external_account_id: Option<String>,
  pub patient_id:          Option<Uuid>,
}

/// `GET /api/links?external_account_id=<id>` or `?patient_id=<id>`
pub async fn list<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<AccountLink>>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let links = match (params.external_account_id, params.patient_id) {
    (Some(account), None) => state.linkage.links_for_account(&account).await?,
    (None, Some(patient_id)) => {
      state.linkage.links_for_patient(patient_id).await?
    }
    _ => {
      return Err(
        CoreError::Validation(
          "exactly one of external_account_id and patient_id is required"
            .into(),
        )
        .into(),
      );
    }
  };
  Ok(Json(links))
}

/// `DELETE /api/links/{id}` — remove a link; switches the account's menu to
/// the unlinked state when it was the account's last one.
pub async fn unlink<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(id): Path<Uuid>,
) -> Result<Json<UnlinkReceipt>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let receipt = state.linkage.unlink(id).await?;
  Ok(Json(receipt))
}
