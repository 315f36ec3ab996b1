//! Handlers for menu-assignment operations.
//!
//! | Method | Path | Auth | Notes |
//! |--------|------|------|-------|
//! | `POST` | `/api/clinics/{id}/menu-resync` | Basic | Re-applies the linked menu to every linked account |
//! | `GET`  | `/api/clinics/{id}/menu-health` | Basic | Reports missing menu refs |

use axum::{
  Json,
  extract::{Path, State},
};
use renkei_core::{
  gateway::MessagingGateway,
  menu_sync::{MenuHealth, ResyncReport},
  store::ClinicStore,
};
use uuid::Uuid;

use crate::{AppState, auth::Authenticated, error::ApiError};

/// `POST /api/clinics/{id}/menu-resync` — used after the clinic's menu refs
/// change. 409 when the assignment config is incomplete.
pub async fn resync<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(clinic_id): Path<Uuid>,
) -> Result<Json<ResyncReport>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let report = state.menus.bulk_resync(clinic_id).await?;
  Ok(Json(report))
}

/// `GET /api/clinics/{id}/menu-health`
pub async fn health<S, G>(
  _: Authenticated,
  State(state): State<AppState<S, G>>,
  Path(clinic_id): Path<Uuid>,
) -> Result<Json<MenuHealth>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  let health = state.menus.config_health(clinic_id).await?;
  Ok(Json(health))
}
