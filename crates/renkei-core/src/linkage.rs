//! The Linkage Manager — creates, releases, and annotates account↔patient
//! links, and keeps the menu synchronizer informed.
//!
//! Menu synchronization runs on the mutation's call path but never gates
//! it: a link or unlink that hit the database is reported as success even
//! when the platform-side menu switch failed. The audit log is written with
//! the same tolerance — a mutation that committed is never failed
//! retroactively over bookkeeping.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  directory::{birthdate_key, normalize_birthdate},
  issuer::CredentialIssuer,
  link::{AccountLink, LinkEvent, LinkEventKind, Relationship},
  menu_sync::{MenuState, MenuSynchronizer, SyncOutcome},
  store::ClinicStore,
};

// ─── Requests & receipts ─────────────────────────────────────────────────────

/// How the caller proves they may link to a patient record.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityProof {
  /// A staff-issued invitation code; the credential resolves the patient.
  Invitation { code: String },
  /// Registration-card number plus birthdate, checked against the patient
  /// directory.
  Directory {
    patient_number: String,
    birth_date:     String,
  },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRequest {
  pub external_account_id: String,
  pub clinic_id:           Uuid,
  pub proof:               IdentityProof,
  #[serde(default)]
  pub relationship:        Relationship,
  #[serde(default)]
  pub nickname:            Option<String>,
}

/// What an unlink left behind.
#[derive(Debug, Clone, Serialize)]
pub struct UnlinkReceipt {
  /// Links the account still holds after the delete.
  pub remaining_links: u64,
  /// Whether the account's menu was switched to the unlinked state as part
  /// of this call.
  pub menu_switched:   bool,
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct LinkageManager<S, G> {
  store:  Arc<S>,
  issuer: CredentialIssuer<S>,
  menus:  MenuSynchronizer<S, G>,
}

impl<S, G> LinkageManager<S, G>
where
  S: ClinicStore,
  G: crate::gateway::MessagingGateway,
{
  pub fn new(store: Arc<S>, gateway: Arc<G>) -> Self {
    Self {
      issuer: CredentialIssuer::new(store.clone()),
      menus:  MenuSynchronizer::new(store.clone(), gateway),
      store,
    }
  }

  /// Create a link after verifying the identity proof.
  ///
  /// With an invitation proof, every check runs before the credential is
  /// consumed; the consume itself is the atomic single-redemption gate, and
  /// a lost race surfaces as `CredentialAlreadyUsed` with no link written.
  pub async fn link(&self, request: LinkRequest) -> Result<AccountLink> {
    if request.external_account_id.trim().is_empty() {
      return Err(Error::Validation("external_account_id is required".into()));
    }

    let now = Utc::now();

    // Resolve the patient and, for invitations, the credential to consume.
    let (patient, credential) = match &request.proof {
      IdentityProof::Invitation { code } => {
        let credential = self.issuer.validate_invitation(code, now).await?;
        if credential.clinic_id != request.clinic_id {
          return Err(Error::CredentialNotFound);
        }
        let patient = self
          .store
          .get_patient(credential.patient_id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::PatientNotFound(credential.patient_id))?;
        (patient, Some(credential))
      }
      IdentityProof::Directory { patient_number, birth_date } => {
        let entered = normalize_birthdate(birth_date)
          .ok_or_else(|| Error::Validation("malformed birth_date".into()))?;
        // An unknown number and a wrong birthdate are reported identically;
        // the error must not disclose which patient numbers exist.
        let patient = self
          .store
          .find_patient_by_number(request.clinic_id, patient_number.trim())
          .await
          .map_err(Error::store)?
          .ok_or(Error::IdentityMismatch)?;
        if birthdate_key(patient.birth_date) != entered {
          return Err(Error::IdentityMismatch);
        }
        (patient, None)
      }
    };

    if let Some(existing) = self
      .store
      .find_link(&request.external_account_id, patient.id)
      .await
      .map_err(Error::store)?
    {
      return Err(Error::AlreadyLinked {
        external_account_id: existing.external_account_id,
        patient_id:          existing.patient_id,
      });
    }

    let prior_links = self
      .store
      .count_links_for_account(&request.external_account_id)
      .await
      .map_err(Error::store)?;

    // Single-redemption gate for the invitation path.
    if let Some(credential) = &credential {
      self.issuer.consume(credential.id, now).await?;
    }

    let link = AccountLink {
      id: Uuid::new_v4(),
      clinic_id: request.clinic_id,
      external_account_id: request.external_account_id.clone(),
      patient_id: patient.id,
      relationship: request.relationship,
      nickname: request.nickname.clone(),
      is_primary: prior_links == 0,
      linked_at: now,
      last_selected_at: None,
    };

    self
      .store
      .insert_link(link.clone())
      .await
      .map_err(Error::store)?;
    self.append_event(&link, LinkEventKind::Linked).await;

    tracing::info!(
      link_id = %link.id,
      patient_id = %patient.id,
      account = request.external_account_id,
      is_primary = link.is_primary,
      "account linked"
    );

    self
      .sync_quietly(link.clinic_id, &link.external_account_id, MenuState::Linked)
      .await;

    Ok(link)
  }

  /// Delete a link; switch the account's menu to unlinked when it was the
  /// account's last one.
  pub async fn unlink(&self, link_id: Uuid) -> Result<UnlinkReceipt> {
    let link = self
      .store
      .get_link(link_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::LinkNotFound)?;

    if !self.store.delete_link(link_id).await.map_err(Error::store)? {
      return Err(Error::LinkNotFound);
    }
    self.append_event(&link, LinkEventKind::Unlinked).await;

    let remaining = self
      .store
      .count_links_for_account(&link.external_account_id)
      .await
      .map_err(Error::store)?;

    let menu_switched = if remaining == 0 {
      self
        .sync_quietly(
          link.clinic_id,
          &link.external_account_id,
          MenuState::Unlinked,
        )
        .await
    } else {
      false
    };

    tracing::info!(
      %link_id,
      account = link.external_account_id,
      remaining,
      menu_switched,
      "account unlinked"
    );

    Ok(UnlinkReceipt { remaining_links: remaining, menu_switched })
  }

  /// Record which linked patient the account is currently acting as.
  /// Ephemeral UI context only; never creates or implies a link.
  pub async fn select_patient(
    &self,
    external_account_id: &str,
    patient_id: Uuid,
  ) -> Result<AccountLink> {
    let mut link = self
      .store
      .find_link(external_account_id, patient_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::LinkNotFound)?;

    let now = Utc::now();
    if !self
      .store
      .touch_link_selected(link.id, now)
      .await
      .map_err(Error::store)?
    {
      return Err(Error::LinkNotFound);
    }
    link.last_selected_at = Some(now);
    self.append_event(&link, LinkEventKind::Selected).await;

    Ok(link)
  }

  pub async fn links_for_account(
    &self,
    external_account_id: &str,
  ) -> Result<Vec<AccountLink>> {
    self
      .store
      .links_for_account(external_account_id)
      .await
      .map_err(Error::store)
  }

  pub async fn links_for_patient(
    &self,
    patient_id: Uuid,
  ) -> Result<Vec<AccountLink>> {
    self
      .store
      .links_for_patient(patient_id)
      .await
      .map_err(Error::store)
  }

  // ── Internals ─────────────────────────────────────────────────────────

  /// Append an audit event; a mutation that already committed is never
  /// failed over bookkeeping, so append errors are logged and swallowed.
  async fn append_event(&self, link: &AccountLink, kind: LinkEventKind) {
    let event = LinkEvent::record(link, kind);
    if let Err(err) = self.store.append_link_event(event).await {
      tracing::warn!(link_id = %link.id, %err, "failed to append link event");
    }
  }

  /// Fire-and-forget menu sync. Returns whether the desired state was
  /// applied; every other outcome is logged and absorbed.
  async fn sync_quietly(
    &self,
    clinic_id: Uuid,
    external_account_id: &str,
    desired: MenuState,
  ) -> bool {
    match self.menus.sync(clinic_id, external_account_id, desired).await {
      Ok(SyncOutcome::Applied) => true,
      Ok(SyncOutcome::ConfigMissing) => false,
      Err(err) => {
        tracing::warn!(
          %clinic_id,
          account = external_account_id,
          %err,
          "menu sync failed after linkage mutation"
        );
        false
      }
    }
  }
}
