//! HTTP service layer for Renkei.
//!
//! Exposes one axum [`Router`] over the domain services in `renkei-core`,
//! backed by any [`ClinicStore`] and [`MessagingGateway`]:
//!
//! - the staff surface under `/api` (HTTP Basic, argon2-verified),
//! - the patient-side linkage endpoints (`/links`, `/links/select`,
//!   `/checkin`), authorized by the credential or identity proof they carry,
//! - the operational surface (`/cron/dispatch` behind a bearer secret,
//!   `/healthz`).

pub mod auth;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod links;
pub mod menus;
pub mod reminders;
pub mod schedules;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{delete, get, post},
};
use renkei_core::{
  dispatch::{DispatchOptions, Dispatcher},
  gateway::MessagingGateway,
  issuer::CredentialIssuer,
  linkage::LinkageManager,
  menu_sync::MenuSynchronizer,
  scheduler::Scheduler,
  store::ClinicStore,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use auth::AuthConfig;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` with
/// `RENKEI_`-prefixed environment overrides (`RENKEI_AUTH__USERNAME` etc.).
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub server:   ListenSettings,
  pub store:    StoreSettings,
  pub auth:     AuthSettings,
  pub gateway:  GatewaySettings,
  pub dispatch: DispatchSettings,
}

#[derive(Deserialize, Clone)]
pub struct ListenSettings {
  pub host: String,
  pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct StoreSettings {
  pub path: PathBuf,
}

#[derive(Deserialize, Clone)]
pub struct AuthSettings {
  pub username:      String,
  /// PHC string produced by argon2 (see `--hash-password`).
  pub password_hash: String,
}

#[derive(Deserialize, Clone)]
pub struct GatewaySettings {
  pub base_url:      String,
  pub channel_token: String,
  #[serde(default = "default_gateway_timeout_secs")]
  pub timeout_secs:  u64,
}

#[derive(Deserialize, Clone)]
pub struct DispatchSettings {
  /// Shared secret the external scheduler presents as
  /// `Authorization: Bearer …`.
  pub cron_secret:    String,
  /// How far ahead of the trigger a schedule may sit and still be picked up.
  /// Matches the cron cadence.
  #[serde(default = "default_dispatch_window_minutes")]
  pub window_minutes: u32,
  #[serde(default = "default_dispatch_max_retries")]
  pub max_retries:    u32,
}

fn default_gateway_timeout_secs() -> u64 {
  10
}

fn default_dispatch_window_minutes() -> u32 {
  5
}

fn default_dispatch_max_retries() -> u32 {
  3
}

impl ServerConfig {
  /// Reject configurations that cannot serve: blank credentials or secrets,
  /// a zero timeout, a zero dispatch window.
  pub fn validate(&self) -> Result<(), String> {
    if self.auth.username.trim().is_empty() {
      return Err("auth.username must not be empty".to_string());
    }
    if self.auth.password_hash.trim().is_empty() {
      return Err("auth.password_hash must not be empty".to_string());
    }
    if self.gateway.base_url.trim().is_empty() {
      return Err("gateway.base_url must not be empty".to_string());
    }
    if self.gateway.channel_token.trim().is_empty() {
      return Err("gateway.channel_token must not be empty".to_string());
    }
    if self.gateway.timeout_secs == 0 {
      return Err("gateway.timeout_secs must be positive".to_string());
    }
    if self.dispatch.cron_secret.trim().is_empty() {
      return Err("dispatch.cron_secret must not be empty".to_string());
    }
    if self.dispatch.window_minutes == 0 {
      return Err("dispatch.window_minutes must be positive".to_string());
    }
    Ok(())
  }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers: the store, the domain
/// services built over it, and the runtime config.
pub struct AppState<S: ClinicStore, G> {
  pub store:      Arc<S>,
  pub issuer:     Arc<CredentialIssuer<S>>,
  pub linkage:    Arc<LinkageManager<S, G>>,
  pub menus:      Arc<MenuSynchronizer<S, G>>,
  pub scheduler:  Arc<Scheduler<S>>,
  pub dispatcher: Arc<Dispatcher<S, G>>,
  pub auth:       Arc<AuthConfig>,
  pub config:     Arc<ServerConfig>,
  /// Serializes overlapping dispatch triggers; see [`dispatch::trigger`].
  pub dispatch_lock: Arc<tokio::sync::Mutex<()>>,
}

// Derived `Clone` would demand `S: Clone` and `G: Clone`; every field is an
// `Arc`, so neither is needed.
impl<S: ClinicStore, G> Clone for AppState<S, G> {
  fn clone(&self) -> Self {
    Self {
      store:         self.store.clone(),
      issuer:        self.issuer.clone(),
      linkage:       self.linkage.clone(),
      menus:         self.menus.clone(),
      scheduler:     self.scheduler.clone(),
      dispatcher:    self.dispatcher.clone(),
      auth:          self.auth.clone(),
      config:        self.config.clone(),
      dispatch_lock: self.dispatch_lock.clone(),
    }
  }
}

impl<S, G> AppState<S, G>
where
  S: ClinicStore,
  G: MessagingGateway,
{
  /// Wire the domain services over one store and gateway.
  pub fn new(store: Arc<S>, gateway: Arc<G>, config: ServerConfig) -> Self {
    let options = DispatchOptions {
      window:      chrono::Duration::minutes(i64::from(
        config.dispatch.window_minutes,
      )),
      max_retries: config.dispatch.max_retries,
    };
    let auth = AuthConfig {
      username:      config.auth.username.clone(),
      password_hash: config.auth.password_hash.clone(),
    };

    Self {
      issuer:     Arc::new(CredentialIssuer::new(store.clone())),
      linkage:    Arc::new(LinkageManager::new(store.clone(), gateway.clone())),
      menus:      Arc::new(MenuSynchronizer::new(store.clone(), gateway.clone())),
      scheduler:  Arc::new(Scheduler::new(store.clone())),
      dispatcher: Arc::new(Dispatcher::new(store.clone(), gateway, options)),
      auth:       Arc::new(auth),
      config:     Arc::new(config),
      dispatch_lock: Arc::new(tokio::sync::Mutex::new(())),
      store,
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the axum [`Router`] for the service.
pub fn router<S, G>(state: AppState<S, G>) -> Router
where
  S: ClinicStore + 'static,
  G: MessagingGateway + 'static,
{
  Router::new()
    // Staff surface (HTTP Basic via the `Authenticated` extractor).
    .route(
      "/api/invitations",
      post(credentials::issue_invitation::<S, G>)
        .get(credentials::list_invitations::<S, G>),
    )
    .route(
      "/api/invitations/{id}",
      delete(credentials::revoke_invitation::<S, G>),
    )
    .route("/api/checkin-tokens", post(credentials::issue_checkin_token::<S, G>))
    .route("/api/links", get(links::list::<S, G>))
    .route("/api/links/{id}", delete(links::unlink::<S, G>))
    .route(
      "/api/schedules",
      post(schedules::create::<S, G>).get(schedules::list::<S, G>),
    )
    .route("/api/schedules/{id}/cancel", post(schedules::cancel::<S, G>))
    .route("/api/schedules/cancel-auto", post(schedules::cancel_auto::<S, G>))
    .route(
      "/api/clinics/{id}/reminder-rule",
      get(reminders::get_rule::<S, G>).put(reminders::put_rule::<S, G>),
    )
    .route(
      "/api/clinics/{id}/evaluate-reminders",
      post(reminders::evaluate::<S, G>),
    )
    .route("/api/clinics/{id}/menu-resync", post(menus::resync::<S, G>))
    .route("/api/clinics/{id}/menu-health", get(menus::health::<S, G>))
    // Patient-side surface, called by the platform webhook worker.
    .route("/links", post(links::create::<S, G>))
    .route("/links/select", post(links::select::<S, G>))
    .route("/checkin", post(credentials::redeem_checkin::<S, G>))
    // Operational surface.
    .route("/cron/dispatch", post(dispatch::trigger::<S, G>))
    .route("/healthz", get(healthz))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn healthz() -> &'static str {
  "ok"
}

#[cfg(test)]
mod tests;
