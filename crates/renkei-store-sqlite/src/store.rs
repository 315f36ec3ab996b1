//! [`SqliteStore`] — the SQLite implementation of [`ClinicStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use renkei_core::{
  credential::{ClaimCredential, CredentialKind},
  directory::{
    Appointment, CheckInMethod, Clinic, MenuAssignment, MessageTemplate,
    Patient,
  },
  link::{AccountLink, LinkEvent},
  reminder::AutoReminderRule,
  schedule::{
    DeliveryFailure, DeliveryRecord, NotificationSchedule, NotificationType,
  },
  store::{ClinicStore, ReleaseOutcome, ReminderCandidate},
};

use crate::{
  Result,
  encode::{
    RawAccountLink, RawAppointment, RawCredential, RawDeliveryFailure,
    RawLinkEvent, RawMenuAssignment, RawPatient, RawReminderRule, RawSchedule,
    RawTemplate, decode_dt, decode_schedule_status, decode_uuid, encode_date,
    encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Row readers ─────────────────────────────────────────────────────────────

const LINK_COLUMNS: &str = "link_id, clinic_id, external_account_id, \
   patient_id, relationship, nickname, is_primary, linked_at, \
   last_selected_at";

fn read_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAccountLink> {
  Ok(RawAccountLink {
    link_id:             row.get(0)?,
    clinic_id:           row.get(1)?,
    external_account_id: row.get(2)?,
    patient_id:          row.get(3)?,
    relationship:        row.get(4)?,
    nickname:            row.get(5)?,
    is_primary:          row.get(6)?,
    linked_at:           row.get(7)?,
    last_selected_at:    row.get(8)?,
  })
}

const EVENT_COLUMNS: &str = "event_id, link_id, clinic_id, \
   external_account_id, patient_id, kind, recorded_at";

fn read_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLinkEvent> {
  Ok(RawLinkEvent {
    event_id:            row.get(0)?,
    link_id:             row.get(1)?,
    clinic_id:           row.get(2)?,
    external_account_id: row.get(3)?,
    patient_id:          row.get(4)?,
    kind:                row.get(5)?,
    recorded_at:         row.get(6)?,
  })
}

const CREDENTIAL_COLUMNS: &str = "credential_id, clinic_id, patient_id, \
   external_account_id, value, kind, payload_json, status, expires_at, \
   created_by, created_at, used_at";

fn read_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCredential> {
  Ok(RawCredential {
    credential_id:       row.get(0)?,
    clinic_id:           row.get(1)?,
    patient_id:          row.get(2)?,
    external_account_id: row.get(3)?,
    value:               row.get(4)?,
    kind:                row.get(5)?,
    payload_json:        row.get(6)?,
    status:              row.get(7)?,
    expires_at:          row.get(8)?,
    created_by:          row.get(9)?,
    created_at:          row.get(10)?,
    used_at:             row.get(11)?,
  })
}

const SCHEDULE_COLUMNS: &str = "schedule_id, clinic_id, patient_id, \
   notification_type, channel, message, template_ref, send_at, status, \
   retry_count, failure_reason, sent_at, auto_send, auto_reminder_sequence, \
   created_at, updated_at";

fn read_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSchedule> {
  Ok(RawSchedule {
    schedule_id:            row.get(0)?,
    clinic_id:              row.get(1)?,
    patient_id:             row.get(2)?,
    notification_type:      row.get(3)?,
    channel:                row.get(4)?,
    message:                row.get(5)?,
    template_ref:           row.get(6)?,
    send_at:                row.get(7)?,
    status:                 row.get(8)?,
    retry_count:            row.get(9)?,
    failure_reason:         row.get(10)?,
    sent_at:                row.get(11)?,
    auto_send:              row.get(12)?,
    auto_reminder_sequence: row.get(13)?,
    created_at:             row.get(14)?,
    updated_at:             row.get(15)?,
  })
}

const PATIENT_COLUMNS: &str = "patient_id, clinic_id, patient_number, \
   family_name, given_name, birth_date";

fn read_patient(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPatient> {
  Ok(RawPatient {
    patient_id:     row.get(0)?,
    clinic_id:      row.get(1)?,
    patient_number: row.get(2)?,
    family_name:    row.get(3)?,
    given_name:     row.get(4)?,
    birth_date:     row.get(5)?,
  })
}

const APPOINTMENT_COLUMNS: &str = "appointment_id, clinic_id, patient_id, \
   start_at, checked_in_at, check_in_method";

fn read_appointment(
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<RawAppointment> {
  Ok(RawAppointment {
    appointment_id:  row.get(0)?,
    clinic_id:       row.get(1)?,
    patient_id:      row.get(2)?,
    start_at:        row.get(3)?,
    checked_in_at:   row.get(4)?,
    check_in_method: row.get(5)?,
  })
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Renkei clinic store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── ClinicStore impl ────────────────────────────────────────────────────────

impl ClinicStore for SqliteStore {
  type Error = crate::Error;

  // ── Account links ─────────────────────────────────────────────────────

  async fn insert_link(&self, link: AccountLink) -> Result<()> {
    let link_id_str     = encode_uuid(link.id);
    let clinic_id_str   = encode_uuid(link.clinic_id);
    let account_id      = link.external_account_id;
    let patient_id_str  = encode_uuid(link.patient_id);
    let relationship    = link.relationship.discriminant().to_owned();
    let nickname        = link.nickname;
    let is_primary      = link.is_primary;
    let linked_at_str   = encode_dt(link.linked_at);
    let selected_at_str = link.last_selected_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO account_links (
             link_id, clinic_id, external_account_id, patient_id,
             relationship, nickname, is_primary, linked_at, last_selected_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            link_id_str,
            clinic_id_str,
            account_id,
            patient_id_str,
            relationship,
            nickname,
            is_primary,
            linked_at_str,
            selected_at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_link(&self, id: Uuid) -> Result<Option<AccountLink>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawAccountLink> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LINK_COLUMNS} FROM account_links WHERE link_id = ?1"
              ),
              rusqlite::params![id_str],
              read_link,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAccountLink::into_link).transpose()
  }

  async fn find_link(
    &self,
    external_account_id: &str,
    patient_id: Uuid,
  ) -> Result<Option<AccountLink>> {
    let account_id = external_account_id.to_owned();
    let patient_id_str = encode_uuid(patient_id);

    let raw: Option<RawAccountLink> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LINK_COLUMNS} FROM account_links
                 WHERE external_account_id = ?1 AND patient_id = ?2"
              ),
              rusqlite::params![account_id, patient_id_str],
              read_link,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAccountLink::into_link).transpose()
  }

  async fn links_for_account(
    &self,
    external_account_id: &str,
  ) -> Result<Vec<AccountLink>> {
    let account_id = external_account_id.to_owned();

    let raws: Vec<RawAccountLink> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LINK_COLUMNS} FROM account_links
           WHERE external_account_id = ?1
           ORDER BY linked_at ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![account_id], read_link)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAccountLink::into_link).collect()
  }

  async fn links_for_patient(
    &self,
    patient_id: Uuid,
  ) -> Result<Vec<AccountLink>> {
    let patient_id_str = encode_uuid(patient_id);

    let raws: Vec<RawAccountLink> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LINK_COLUMNS} FROM account_links
           WHERE patient_id = ?1
           ORDER BY linked_at ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![patient_id_str], read_link)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAccountLink::into_link).collect()
  }

  async fn primary_link_for_patient(
    &self,
    patient_id: Uuid,
  ) -> Result<Option<AccountLink>> {
    let patient_id_str = encode_uuid(patient_id);

    let raw: Option<RawAccountLink> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LINK_COLUMNS} FROM account_links
                 WHERE patient_id = ?1
                 ORDER BY is_primary DESC, linked_at ASC
                 LIMIT 1"
              ),
              rusqlite::params![patient_id_str],
              read_link,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAccountLink::into_link).transpose()
  }

  async fn count_links_for_account(
    &self,
    external_account_id: &str,
  ) -> Result<u64> {
    let account_id = external_account_id.to_owned();

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM account_links WHERE external_account_id = ?1",
          rusqlite::params![account_id],
          |row| row.get(0),
        )?)
      })
      .await?;

    Ok(count as u64)
  }

  async fn delete_link(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM account_links WHERE link_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn touch_link_selected(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE account_links SET last_selected_at = ?2 WHERE link_id = ?1",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn linked_accounts_for_clinic(
    &self,
    clinic_id: Uuid,
  ) -> Result<Vec<String>> {
    let clinic_id_str = encode_uuid(clinic_id);

    let accounts = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT external_account_id FROM account_links
           WHERE clinic_id = ?1
           ORDER BY external_account_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![clinic_id_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(accounts)
  }

  // ── Link audit log (append-only) ──────────────────────────────────────

  async fn append_link_event(&self, event: LinkEvent) -> Result<()> {
    let event_id_str   = encode_uuid(event.id);
    let link_id_str    = encode_uuid(event.link_id);
    let clinic_id_str  = encode_uuid(event.clinic_id);
    let account_id     = event.external_account_id;
    let patient_id_str = encode_uuid(event.patient_id);
    let kind           = event.kind.discriminant().to_owned();
    let at_str         = encode_dt(event.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO link_events (
             event_id, link_id, clinic_id, external_account_id, patient_id,
             kind, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            event_id_str,
            link_id_str,
            clinic_id_str,
            account_id,
            patient_id_str,
            kind,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn link_events(&self, link_id: Uuid) -> Result<Vec<LinkEvent>> {
    let link_id_str = encode_uuid(link_id);

    let raws: Vec<RawLinkEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM link_events
           WHERE link_id = ?1
           ORDER BY recorded_at ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![link_id_str], read_event)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLinkEvent::into_event).collect()
  }

  // ── Claim credentials ─────────────────────────────────────────────────

  async fn insert_credential(&self, credential: ClaimCredential) -> Result<()> {
    let credential_id_str = encode_uuid(credential.id);
    let clinic_id_str     = encode_uuid(credential.clinic_id);
    let patient_id_str    = encode_uuid(credential.patient_id);
    let account_id        = credential.external_account_id;
    let value             = credential.value;
    let kind              = credential.kind.discriminant().to_owned();
    let payload_json      = credential
      .payload
      .as_ref()
      .map(serde_json::to_string)
      .transpose()?;
    let status            = credential.status.discriminant().to_owned();
    let expires_at_str    = encode_dt(credential.expires_at);
    let created_by        = credential.created_by;
    let created_at_str    = encode_dt(credential.created_at);
    let used_at_str       = credential.used_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO claim_credentials (
             credential_id, clinic_id, patient_id, external_account_id,
             value, kind, payload_json, status, expires_at, created_by,
             created_at, used_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
          rusqlite::params![
            credential_id_str,
            clinic_id_str,
            patient_id_str,
            account_id,
            value,
            kind,
            payload_json,
            status,
            expires_at_str,
            created_by,
            created_at_str,
            used_at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_credential(&self, id: Uuid) -> Result<Option<ClaimCredential>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawCredential> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM claim_credentials
                 WHERE credential_id = ?1"
              ),
              rusqlite::params![id_str],
              read_credential,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCredential::into_credential).transpose()
  }

  async fn credential_by_value(
    &self,
    value: &str,
  ) -> Result<Option<ClaimCredential>> {
    let value = value.to_owned();

    // Terminal rows release a value for reuse, so several rows can share
    // one; the live row wins, then recency.
    let raw: Option<RawCredential> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM claim_credentials
                 WHERE value = ?1
                 ORDER BY (status = 'active') DESC, created_at DESC
                 LIMIT 1"
              ),
              rusqlite::params![value],
              read_credential,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCredential::into_credential).transpose()
  }

  async fn value_in_use(&self, value: &str) -> Result<bool> {
    let value = value.to_owned();

    let in_use: bool = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM claim_credentials
               WHERE value = ?1 AND status = 'active'
               LIMIT 1",
              rusqlite::params![value],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;

    Ok(in_use)
  }

  async fn active_invitation_for_patient(
    &self,
    patient_id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<Option<ClaimCredential>> {
    let patient_id_str = encode_uuid(patient_id);
    let now_str = encode_dt(now);

    let raw: Option<RawCredential> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM claim_credentials
                 WHERE patient_id = ?1
                   AND kind = 'invitation'
                   AND status = 'active'
                   AND expires_at > ?2
                 ORDER BY created_at DESC
                 LIMIT 1"
              ),
              rusqlite::params![patient_id_str, now_str],
              read_credential,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCredential::into_credential).transpose()
  }

  async fn consume_credential(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE claim_credentials SET status = 'used', used_at = ?2
           WHERE credential_id = ?1 AND status = 'active'",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn expire_credential(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE claim_credentials SET status = 'expired'
           WHERE credential_id = ?1 AND status = 'active'",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn credentials_for_patient(
    &self,
    patient_id: Uuid,
    kind: CredentialKind,
  ) -> Result<Vec<ClaimCredential>> {
    let patient_id_str = encode_uuid(patient_id);
    let kind_str = kind.discriminant().to_owned();

    let raws: Vec<RawCredential> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CREDENTIAL_COLUMNS} FROM claim_credentials
           WHERE patient_id = ?1 AND kind = ?2
           ORDER BY created_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![patient_id_str, kind_str], read_credential)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCredential::into_credential).collect()
  }

  // ── Menu assignment ───────────────────────────────────────────────────

  async fn menu_assignment(
    &self,
    clinic_id: Uuid,
  ) -> Result<Option<MenuAssignment>> {
    let clinic_id_str = encode_uuid(clinic_id);

    let raw: Option<RawMenuAssignment> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT clinic_id, linked_menu_ref, unlinked_menu_ref, updated_at
               FROM menu_assignments WHERE clinic_id = ?1",
              rusqlite::params![clinic_id_str],
              |row| {
                Ok(RawMenuAssignment {
                  clinic_id:         row.get(0)?,
                  linked_menu_ref:   row.get(1)?,
                  unlinked_menu_ref: row.get(2)?,
                  updated_at:        row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawMenuAssignment::into_assignment).transpose()
  }

  async fn upsert_menu_assignment(
    &self,
    assignment: MenuAssignment,
  ) -> Result<()> {
    let clinic_id_str = encode_uuid(assignment.clinic_id);
    let linked_ref    = assignment.linked_menu_ref;
    let unlinked_ref  = assignment.unlinked_menu_ref;
    let at_str        = encode_dt(assignment.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO menu_assignments (
             clinic_id, linked_menu_ref, unlinked_menu_ref, updated_at
           ) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (clinic_id) DO UPDATE SET
             linked_menu_ref   = excluded.linked_menu_ref,
             unlinked_menu_ref = excluded.unlinked_menu_ref,
             updated_at        = excluded.updated_at",
          rusqlite::params![clinic_id_str, linked_ref, unlinked_ref, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Notification schedules ────────────────────────────────────────────

  async fn insert_schedule(&self, schedule: NotificationSchedule) -> Result<()> {
    let schedule_id_str = encode_uuid(schedule.id);
    let clinic_id_str   = encode_uuid(schedule.clinic_id);
    let patient_id_str  = encode_uuid(schedule.patient_id);
    let type_str        = schedule.notification_type.discriminant().to_owned();
    let channel_str     = schedule.channel.discriminant().to_owned();
    let message         = schedule.message;
    let template_ref    = schedule.template_ref;
    let send_at_str     = encode_dt(schedule.send_at);
    let status_str      = schedule.status.discriminant().to_owned();
    let retry_count     = i64::from(schedule.retry_count);
    let failure_reason  = schedule.failure_reason;
    let sent_at_str     = schedule.sent_at.map(encode_dt);
    let auto_send       = schedule.auto_send;
    let sequence        = schedule.auto_reminder_sequence.map(i64::from);
    let created_at_str  = encode_dt(schedule.created_at);
    let updated_at_str  = encode_dt(schedule.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO notification_schedules (
             schedule_id, clinic_id, patient_id, notification_type, channel,
             message, template_ref, send_at, status, retry_count,
             failure_reason, sent_at, auto_send, auto_reminder_sequence,
             created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                     ?14, ?15, ?16)",
          rusqlite::params![
            schedule_id_str,
            clinic_id_str,
            patient_id_str,
            type_str,
            channel_str,
            message,
            template_ref,
            send_at_str,
            status_str,
            retry_count,
            failure_reason,
            sent_at_str,
            auto_send,
            sequence,
            created_at_str,
            updated_at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_schedule(&self, id: Uuid) -> Result<Option<NotificationSchedule>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSchedule> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SCHEDULE_COLUMNS} FROM notification_schedules
                 WHERE schedule_id = ?1"
              ),
              rusqlite::params![id_str],
              read_schedule,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSchedule::into_schedule).transpose()
  }

  async fn due_schedules(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<NotificationSchedule>> {
    let from_str = encode_dt(from);
    let to_str = encode_dt(to);

    let raws: Vec<RawSchedule> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SCHEDULE_COLUMNS} FROM notification_schedules
           WHERE status = 'scheduled'
             AND auto_send = 1
             AND send_at >= ?1
             AND send_at <= ?2
           ORDER BY send_at ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![from_str, to_str], read_schedule)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSchedule::into_schedule).collect()
  }

  async fn claim_for_sending(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notification_schedules SET status = 'sending', updated_at = ?2
           WHERE schedule_id = ?1 AND status = 'scheduled'",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notification_schedules
           SET status = 'sent', sent_at = ?2, updated_at = ?2
           WHERE schedule_id = ?1 AND status = 'sending'",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn release_after_failure(
    &self,
    id: Uuid,
    reason: String,
    max_retries: u32,
    at: DateTime<Utc>,
  ) -> Result<Option<ReleaseOutcome>> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);
    let max = i64::from(max_retries);

    // The UPDATE's right-hand sides see the pre-update row, so
    // `retry_count + 1` is the new count in both places.
    let row: Option<(i64, String)> = self
      .conn
      .call(move |conn| {
        let affected = conn.execute(
          "UPDATE notification_schedules
           SET retry_count    = retry_count + 1,
               failure_reason = ?2,
               status         = CASE WHEN retry_count + 1 >= ?3
                                     THEN 'failed' ELSE 'scheduled' END,
               updated_at     = ?4
           WHERE schedule_id = ?1 AND status = 'sending'",
          rusqlite::params![id_str, reason, max, at_str],
        )?;
        if affected == 0 {
          return Ok(None);
        }
        let row = conn.query_row(
          "SELECT retry_count, status FROM notification_schedules
           WHERE schedule_id = ?1",
          rusqlite::params![id_str],
          |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(Some(row))
      })
      .await?;

    row
      .map(|(count, status)| {
        Ok(ReleaseOutcome {
          retry_count: count as u32,
          status:      decode_schedule_status(&status)?,
        })
      })
      .transpose()
  }

  async fn cancel_schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(at);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notification_schedules
           SET status = 'cancelled', updated_at = ?2
           WHERE schedule_id = ?1 AND status = 'scheduled'",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn cancel_auto_reminders(
    &self,
    patient_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<u64> {
    let patient_id_str = encode_uuid(patient_id);
    let at_str = encode_dt(at);

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notification_schedules
           SET status = 'cancelled', updated_at = ?2
           WHERE patient_id = ?1
             AND status = 'scheduled'
             AND auto_send = 1
             AND auto_reminder_sequence IS NOT NULL",
          rusqlite::params![patient_id_str, at_str],
        )?)
      })
      .await?;

    Ok(affected as u64)
  }

  async fn schedules_for_patient(
    &self,
    patient_id: Uuid,
  ) -> Result<Vec<NotificationSchedule>> {
    let patient_id_str = encode_uuid(patient_id);

    let raws: Vec<RawSchedule> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SCHEDULE_COLUMNS} FROM notification_schedules
           WHERE patient_id = ?1
           ORDER BY send_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![patient_id_str], read_schedule)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSchedule::into_schedule).collect()
  }

  async fn max_reminder_sequence(&self, patient_id: Uuid) -> Result<Option<u32>> {
    let patient_id_str = encode_uuid(patient_id);

    let max: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT MAX(auto_reminder_sequence) FROM notification_schedules
           WHERE patient_id = ?1 AND auto_send = 1",
          rusqlite::params![patient_id_str],
          |row| row.get(0),
        )?)
      })
      .await?;

    Ok(max.map(|m| m as u32))
  }

  async fn has_open_reminder(
    &self,
    patient_id: Uuid,
    sequence: u32,
  ) -> Result<bool> {
    let patient_id_str = encode_uuid(patient_id);
    let sequence = i64::from(sequence);

    let open: bool = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM notification_schedules
               WHERE patient_id = ?1
                 AND auto_reminder_sequence = ?2
                 AND auto_send = 1
                 AND status IN ('scheduled', 'sending')
               LIMIT 1",
              rusqlite::params![patient_id_str, sequence],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;

    Ok(open)
  }

  // ── Auto-reminder rules ───────────────────────────────────────────────

  async fn reminder_rule(&self, clinic_id: Uuid) -> Result<Option<AutoReminderRule>> {
    let clinic_id_str = encode_uuid(clinic_id);

    let raw: Option<RawReminderRule> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT clinic_id, enabled, intervals_json, default_send_hour,
                      updated_at
               FROM auto_reminder_rules WHERE clinic_id = ?1",
              rusqlite::params![clinic_id_str],
              |row| {
                Ok(RawReminderRule {
                  clinic_id:         row.get(0)?,
                  enabled:           row.get(1)?,
                  intervals_json:    row.get(2)?,
                  default_send_hour: row.get(3)?,
                  updated_at:        row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawReminderRule::into_rule).transpose()
  }

  async fn upsert_reminder_rule(&self, rule: AutoReminderRule) -> Result<()> {
    let clinic_id_str  = encode_uuid(rule.clinic_id);
    let enabled        = rule.enabled;
    let intervals_json = serde_json::to_string(&rule.intervals)?;
    let send_hour      = i64::from(rule.default_send_hour);
    let at_str         = encode_dt(rule.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO auto_reminder_rules (
             clinic_id, enabled, intervals_json, default_send_hour, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (clinic_id) DO UPDATE SET
             enabled           = excluded.enabled,
             intervals_json    = excluded.intervals_json,
             default_send_hour = excluded.default_send_hour,
             updated_at        = excluded.updated_at",
          rusqlite::params![
            clinic_id_str,
            enabled,
            intervals_json,
            send_hour,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Delivery bookkeeping (append-only) ────────────────────────────────

  async fn append_delivery_failure(&self, failure: DeliveryFailure) -> Result<()> {
    let failure_id_str  = encode_uuid(failure.id);
    let schedule_id_str = encode_uuid(failure.schedule_id);
    let clinic_id_str   = encode_uuid(failure.clinic_id);
    let patient_id_str  = encode_uuid(failure.patient_id);
    let channel_str     = failure.channel.discriminant().to_owned();
    let reason          = failure.reason;
    let is_retryable    = failure.is_retryable;
    let at_str          = encode_dt(failure.failed_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO delivery_failures (
             failure_id, schedule_id, clinic_id, patient_id, channel, reason,
             is_retryable, failed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            failure_id_str,
            schedule_id_str,
            clinic_id_str,
            patient_id_str,
            channel_str,
            reason,
            is_retryable,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn failures_for_schedule(
    &self,
    schedule_id: Uuid,
  ) -> Result<Vec<DeliveryFailure>> {
    let schedule_id_str = encode_uuid(schedule_id);

    let raws: Vec<RawDeliveryFailure> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT failure_id, schedule_id, clinic_id, patient_id, channel,
                  reason, is_retryable, failed_at
           FROM delivery_failures
           WHERE schedule_id = ?1
           ORDER BY failed_at ASC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![schedule_id_str], |row| {
            Ok(RawDeliveryFailure {
              failure_id:   row.get(0)?,
              schedule_id:  row.get(1)?,
              clinic_id:    row.get(2)?,
              patient_id:   row.get(3)?,
              channel:      row.get(4)?,
              reason:       row.get(5)?,
              is_retryable: row.get(6)?,
              failed_at:    row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDeliveryFailure::into_failure).collect()
  }

  async fn append_delivery_record(&self, record: DeliveryRecord) -> Result<()> {
    let record_id_str   = encode_uuid(record.id);
    let schedule_id_str = encode_uuid(record.schedule_id);
    let clinic_id_str   = encode_uuid(record.clinic_id);
    let patient_id_str  = encode_uuid(record.patient_id);
    let channel_str     = record.channel.discriminant().to_owned();
    let sent_at_str     = encode_dt(record.sent_at);
    let hour            = i64::from(record.hour_of_day);
    let weekday         = i64::from(record.day_of_week);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO delivery_records (
             record_id, schedule_id, clinic_id, patient_id, channel, sent_at,
             hour_of_day, day_of_week
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            record_id_str,
            schedule_id_str,
            clinic_id_str,
            patient_id_str,
            channel_str,
            sent_at_str,
            hour,
            weekday,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Collaborator directory ────────────────────────────────────────────

  async fn insert_clinic(&self, clinic: Clinic) -> Result<()> {
    let clinic_id_str = encode_uuid(clinic.id);
    let name = clinic.name;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO clinics (clinic_id, name) VALUES (?1, ?2)",
          rusqlite::params![clinic_id_str, name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_clinic(&self, id: Uuid) -> Result<Option<Clinic>> {
    let id_str = encode_uuid(id);

    let row: Option<(String, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT clinic_id, name FROM clinics WHERE clinic_id = ?1",
              rusqlite::params![id_str],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    row
      .map(|(id, name)| Ok(Clinic { id: decode_uuid(&id)?, name }))
      .transpose()
  }

  async fn insert_patient(&self, patient: Patient) -> Result<()> {
    let patient_id_str = encode_uuid(patient.id);
    let clinic_id_str  = encode_uuid(patient.clinic_id);
    let number         = patient.patient_number;
    let family_name    = patient.family_name;
    let given_name     = patient.given_name;
    let birth_date_str = encode_date(patient.birth_date);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO patients (
             patient_id, clinic_id, patient_number, family_name, given_name,
             birth_date
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            patient_id_str,
            clinic_id_str,
            number,
            family_name,
            given_name,
            birth_date_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawPatient> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {PATIENT_COLUMNS} FROM patients WHERE patient_id = ?1"
              ),
              rusqlite::params![id_str],
              read_patient,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPatient::into_patient).transpose()
  }

  async fn find_patient_by_number(
    &self,
    clinic_id: Uuid,
    patient_number: &str,
  ) -> Result<Option<Patient>> {
    let clinic_id_str = encode_uuid(clinic_id);
    let number = patient_number.to_owned();

    let raw: Option<RawPatient> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {PATIENT_COLUMNS} FROM patients
                 WHERE clinic_id = ?1 AND patient_number = ?2"
              ),
              rusqlite::params![clinic_id_str, number],
              read_patient,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPatient::into_patient).transpose()
  }

  async fn insert_appointment(&self, appointment: Appointment) -> Result<()> {
    let appointment_id_str = encode_uuid(appointment.id);
    let clinic_id_str      = encode_uuid(appointment.clinic_id);
    let patient_id_str     = encode_uuid(appointment.patient_id);
    let start_at_str       = encode_dt(appointment.start_at);
    let checked_in_at_str  = appointment.checked_in_at.map(encode_dt);
    let method_str         = appointment
      .check_in_method
      .map(|m| m.discriminant().to_owned());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO appointments (
             appointment_id, clinic_id, patient_id, start_at, checked_in_at,
             check_in_method
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            appointment_id_str,
            clinic_id_str,
            patient_id_str,
            start_at_str,
            checked_in_at_str,
            method_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn earliest_appointment_between(
    &self,
    patient_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Option<Appointment>> {
    let patient_id_str = encode_uuid(patient_id);
    let from_str = encode_dt(from);
    let to_str = encode_dt(to);

    let raw: Option<RawAppointment> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE patient_id = ?1 AND start_at >= ?2 AND start_at < ?3
                 ORDER BY start_at ASC
                 LIMIT 1"
              ),
              rusqlite::params![patient_id_str, from_str, to_str],
              read_appointment,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAppointment::into_appointment).transpose()
  }

  async fn mark_checked_in(
    &self,
    appointment_id: Uuid,
    at: DateTime<Utc>,
    method: CheckInMethod,
  ) -> Result<bool> {
    let appointment_id_str = encode_uuid(appointment_id);
    let at_str = encode_dt(at);
    let method_str = method.discriminant().to_owned();

    let affected = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE appointments
           SET checked_in_at = ?2, check_in_method = ?3
           WHERE appointment_id = ?1 AND checked_in_at IS NULL",
          rusqlite::params![appointment_id_str, at_str, method_str],
        )?)
      })
      .await?;

    Ok(affected > 0)
  }

  async fn reminder_candidates(
    &self,
    clinic_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<ReminderCandidate>> {
    let clinic_id_str = encode_uuid(clinic_id);
    let from_str = encode_dt(from);
    let to_str = encode_dt(to);

    // MAX runs over every appointment including future ones, so a patient
    // with an upcoming booking falls outside any past window.
    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT patient_id, MAX(start_at) AS last_at
           FROM appointments
           WHERE clinic_id = ?1
           GROUP BY patient_id
           HAVING last_at >= ?2 AND last_at <= ?3
           ORDER BY last_at ASC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![clinic_id_str, from_str, to_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(patient_id, last_at)| {
        Ok(ReminderCandidate {
          patient_id:          decode_uuid(&patient_id)?,
          last_appointment_at: decode_dt(&last_at)?,
        })
      })
      .collect()
  }

  async fn insert_template(&self, template: MessageTemplate) -> Result<()> {
    let template_id_str = encode_uuid(template.id);
    let clinic_id_str   = encode_uuid(template.clinic_id);
    let type_str        = template.notification_type.discriminant().to_owned();
    let body            = template.body;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO message_templates (
             template_id, clinic_id, notification_type, body
           ) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![template_id_str, clinic_id_str, type_str, body],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn template_for(
    &self,
    clinic_id: Uuid,
    notification_type: NotificationType,
  ) -> Result<Option<MessageTemplate>> {
    let clinic_id_str = encode_uuid(clinic_id);
    let type_str = notification_type.discriminant().to_owned();

    let raw: Option<RawTemplate> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT template_id, clinic_id, notification_type, body
               FROM message_templates
               WHERE clinic_id = ?1 AND notification_type = ?2",
              rusqlite::params![clinic_id_str, type_str],
              |row| {
                Ok(RawTemplate {
                  template_id:       row.get(0)?,
                  clinic_id:         row.get(1)?,
                  notification_type: row.get(2)?,
                  body:              row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTemplate::into_template).transpose()
  }
}
