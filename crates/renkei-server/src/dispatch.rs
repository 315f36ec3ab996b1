//! Handler for the externally-triggered dispatch tick.
//!
//! | Method | Path | Auth | Notes |
//! |--------|------|------|-------|
//! | `POST` | `/cron/dispatch` | Bearer `cron_secret` | Runs one tick; returns `{total, sent, failed}` |

use axum::{Json, extract::State, http::HeaderMap};
use chrono::Utc;
use renkei_core::{
  dispatch::DispatchSummary, gateway::MessagingGateway, store::ClinicStore,
};

use crate::{AppState, auth::verify_cron, error::ApiError};

/// `POST /cron/dispatch` — one dispatch tick.
///
/// Overlapping triggers (a slow tick still running when cron fires again)
/// are serialized behind an in-process mutex; the per-schedule claim CAS
/// already prevents double-sends, so the lock only keeps a pile-up of ticks
/// from hammering the store.
pub async fn trigger<S, G>(
  State(state): State<AppState<S, G>>,
  headers: HeaderMap,
) -> Result<Json<DispatchSummary>, ApiError>
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  verify_cron(&headers, &state.config.dispatch.cron_secret)?;

  let _running = state.dispatch_lock.lock().await;
  let summary = state.dispatcher.run_tick(Utc::now()).await?;
  Ok(Json(summary))
}
