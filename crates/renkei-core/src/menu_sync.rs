//! The Menu-State Synchronizer — reconciles an external account's assigned
//! platform menu with its current linkage state.
//!
//! The unbind/bind pair is not transactional; a crash between the two calls
//! leaves the account temporarily menu-less, which self-corrects on the next
//! triggering event or an operator-invoked bulk resync.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  gateway::{GatewayAck, GatewayError, MessagingGateway},
  store::ClinicStore,
};

// ─── States & outcomes ───────────────────────────────────────────────────────

/// The linkage-derived menu an account should observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuState {
  Linked,
  Unlinked,
}

/// Result of one sync attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
  /// Unbind + bind both completed; the account now observes the desired
  /// menu.
  Applied,
  /// The clinic's menu assignment is absent or incomplete; nothing was
  /// changed. Non-fatal by design.
  ConfigMissing,
}

/// Per-clinic outcome of [`MenuSynchronizer::bulk_resync`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResyncReport {
  pub total:   usize,
  pub applied: usize,
  pub failed:  usize,
}

/// Operational health of a clinic's menu assignment.
#[derive(Debug, Clone, Serialize)]
pub struct MenuHealth {
  pub clinic_id: Uuid,
  pub complete:  bool,
  /// Names of the refs still unset (`linked_menu_ref`, `unlinked_menu_ref`).
  pub missing:   Vec<&'static str>,
}

// ─── Synchronizer ────────────────────────────────────────────────────────────

pub struct MenuSynchronizer<S, G> {
  store:   Arc<S>,
  gateway: Arc<G>,
}

impl<S, G> MenuSynchronizer<S, G>
where
  S: ClinicStore,
  G: MessagingGateway,
{
  pub fn new(store: Arc<S>, gateway: Arc<G>) -> Self {
    Self { store, gateway }
  }

  /// Drive the account's menu to `desired`.
  ///
  /// Incomplete config short-circuits to [`SyncOutcome::ConfigMissing`]
  /// without touching the platform. Otherwise: unbind whatever is assigned
  /// (a `not_found` ack means nothing was assigned — success), then bind
  /// the desired ref. Idempotent; safe to re-run.
  pub async fn sync(
    &self,
    clinic_id: Uuid,
    external_account_id: &str,
    desired: MenuState,
  ) -> Result<SyncOutcome> {
    let Some((linked, unlinked)) = self.menu_refs(clinic_id).await? else {
      tracing::warn!(%clinic_id, "menu sync skipped: assignment config incomplete");
      return Ok(SyncOutcome::ConfigMissing);
    };

    let target = match desired {
      MenuState::Linked => linked,
      MenuState::Unlinked => unlinked,
    };

    // Nothing-to-unbind is success; the account simply had no menu yet.
    self.gateway.unbind_menu(external_account_id).await?;

    match self.gateway.bind_menu(external_account_id, &target).await? {
      GatewayAck::Applied => {
        tracing::info!(
          %clinic_id,
          account = external_account_id,
          state = ?desired,
          "menu synchronized"
        );
        Ok(SyncOutcome::Applied)
      }
      // The configured ref no longer exists on the platform; retrying the
      // same ref cannot help.
      GatewayAck::NotFound => Err(Error::Gateway(GatewayError::terminal(
        format!("menu ref {target:?} unknown to the platform"),
        Some(404),
      ))),
    }
  }

  /// Re-apply `sync(..., Linked)` for every account holding at least one
  /// link under the clinic. Used after an administrator changes the
  /// clinic's menu refs; never on the link/unlink hot path.
  ///
  /// Fails fast with [`Error::ConfigMissing`] when the clinic's config is
  /// incomplete — there is nothing meaningful to re-apply.
  pub async fn bulk_resync(&self, clinic_id: Uuid) -> Result<ResyncReport> {
    if self.menu_refs(clinic_id).await?.is_none() {
      return Err(Error::ConfigMissing(clinic_id));
    }

    let accounts = self
      .store
      .linked_accounts_for_clinic(clinic_id)
      .await
      .map_err(Error::store)?;

    let mut report = ResyncReport { total: accounts.len(), ..Default::default() };
    for account in &accounts {
      match self.sync(clinic_id, account, MenuState::Linked).await {
        Ok(SyncOutcome::Applied) => report.applied += 1,
        // Config vanished mid-run; count the remainder as failures.
        Ok(SyncOutcome::ConfigMissing) => report.failed += 1,
        Err(err) => {
          tracing::warn!(%clinic_id, account, %err, "resync failed for account");
          report.failed += 1;
        }
      }
    }

    tracing::info!(
      %clinic_id,
      total = report.total,
      applied = report.applied,
      failed = report.failed,
      "bulk resync finished"
    );
    Ok(report)
  }

  /// Explicit operational health check for the clinic's menu assignment.
  pub async fn config_health(&self, clinic_id: Uuid) -> Result<MenuHealth> {
    let assignment = self
      .store
      .menu_assignment(clinic_id)
      .await
      .map_err(Error::store)?;

    let mut missing = Vec::new();
    match assignment {
      None => {
        missing.push("linked_menu_ref");
        missing.push("unlinked_menu_ref");
      }
      Some(a) => {
        if a.linked_menu_ref.is_none() {
          missing.push("linked_menu_ref");
        }
        if a.unlinked_menu_ref.is_none() {
          missing.push("unlinked_menu_ref");
        }
      }
    }

    Ok(MenuHealth { clinic_id, complete: missing.is_empty(), missing })
  }

  async fn menu_refs(&self, clinic_id: Uuid) -> Result<Option<(String, String)>> {
    let assignment = self
      .store
      .menu_assignment(clinic_id)
      .await
      .map_err(Error::store)?;

    Ok(assignment.and_then(|a| {
      match (a.linked_menu_ref, a.unlinked_menu_ref) {
        (Some(linked), Some(unlinked)) => Some((linked, unlinked)),
        _ => None,
      }
    }))
  }
}
