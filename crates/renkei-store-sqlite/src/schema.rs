//! SQL schema for the Renkei SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS clinics (
    clinic_id  TEXT PRIMARY KEY,
    name       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS patients (
    patient_id     TEXT PRIMARY KEY,
    clinic_id      TEXT NOT NULL REFERENCES clinics(clinic_id),
    patient_number TEXT NOT NULL,
    family_name    TEXT NOT NULL,
    given_name     TEXT NOT NULL,
    birth_date     TEXT NOT NULL,   -- YYYY-MM-DD
    UNIQUE (clinic_id, patient_number)
);

CREATE TABLE IF NOT EXISTS appointments (
    appointment_id  TEXT PRIMARY KEY,
    clinic_id       TEXT NOT NULL REFERENCES clinics(clinic_id),
    patient_id      TEXT NOT NULL REFERENCES patients(patient_id),
    start_at        TEXT NOT NULL,
    checked_in_at   TEXT,
    check_in_method TEXT             -- 'qr_code' | 'manual'
);

CREATE TABLE IF NOT EXISTS message_templates (
    template_id       TEXT PRIMARY KEY,
    clinic_id         TEXT NOT NULL REFERENCES clinics(clinic_id),
    notification_type TEXT NOT NULL,
    body              TEXT NOT NULL,
    UNIQUE (clinic_id, notification_type)
);

CREATE TABLE IF NOT EXISTS account_links (
    link_id             TEXT PRIMARY KEY,
    clinic_id           TEXT NOT NULL REFERENCES clinics(clinic_id),
    external_account_id TEXT NOT NULL,
    patient_id          TEXT NOT NULL REFERENCES patients(patient_id),
    relationship        TEXT NOT NULL DEFAULT 'self',
    nickname            TEXT,
    is_primary          INTEGER NOT NULL DEFAULT 0,
    linked_at           TEXT NOT NULL,
    last_selected_at    TEXT,
    UNIQUE (external_account_id, patient_id)
);

-- Link history is strictly append-only and outlives its link row, so
-- link_id deliberately carries no foreign key.
CREATE TABLE IF NOT EXISTS link_events (
    event_id            TEXT PRIMARY KEY,
    link_id             TEXT NOT NULL,
    clinic_id           TEXT NOT NULL,
    external_account_id TEXT NOT NULL,
    patient_id          TEXT NOT NULL,
    kind                TEXT NOT NULL,   -- 'linked' | 'unlinked' | 'selected'
    recorded_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS claim_credentials (
    credential_id       TEXT PRIMARY KEY,
    clinic_id           TEXT NOT NULL REFERENCES clinics(clinic_id),
    patient_id          TEXT NOT NULL REFERENCES patients(patient_id),
    external_account_id TEXT,
    value               TEXT NOT NULL,
    kind                TEXT NOT NULL,   -- 'invitation' | 'checkin'
    payload_json        TEXT,
    status              TEXT NOT NULL DEFAULT 'active',
    expires_at          TEXT NOT NULL,
    created_by          TEXT,
    created_at          TEXT NOT NULL,
    used_at             TEXT
);

-- At most one live credential may hold a given value; terminal rows
-- release it.
CREATE UNIQUE INDEX IF NOT EXISTS claim_credentials_active_value_idx
    ON claim_credentials(value) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS menu_assignments (
    clinic_id         TEXT PRIMARY KEY REFERENCES clinics(clinic_id),
    linked_menu_ref   TEXT,
    unlinked_menu_ref TEXT,
    updated_at        TEXT NOT NULL
);

-- Schedules are never deleted; terminal rows are the delivery history.
CREATE TABLE IF NOT EXISTS notification_schedules (
    schedule_id            TEXT PRIMARY KEY,
    clinic_id              TEXT NOT NULL REFERENCES clinics(clinic_id),
    patient_id             TEXT NOT NULL REFERENCES patients(patient_id),
    notification_type      TEXT NOT NULL,
    channel                TEXT NOT NULL,
    message                TEXT NOT NULL DEFAULT '',
    template_ref           TEXT,
    send_at                TEXT NOT NULL,
    status                 TEXT NOT NULL DEFAULT 'scheduled',
    retry_count            INTEGER NOT NULL DEFAULT 0,
    failure_reason         TEXT,
    sent_at                TEXT,
    auto_send              INTEGER NOT NULL DEFAULT 0,
    auto_reminder_sequence INTEGER,
    created_at             TEXT NOT NULL,
    updated_at             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS auto_reminder_rules (
    clinic_id         TEXT PRIMARY KEY REFERENCES clinics(clinic_id),
    enabled           INTEGER NOT NULL DEFAULT 0,
    intervals_json    TEXT NOT NULL DEFAULT '[]',
    default_send_hour INTEGER NOT NULL DEFAULT 18,
    updated_at        TEXT NOT NULL
);

-- Delivery bookkeeping is strictly append-only.
CREATE TABLE IF NOT EXISTS delivery_failures (
    failure_id   TEXT PRIMARY KEY,
    schedule_id  TEXT NOT NULL REFERENCES notification_schedules(schedule_id),
    clinic_id    TEXT NOT NULL,
    patient_id   TEXT NOT NULL,
    channel      TEXT NOT NULL,
    reason       TEXT NOT NULL,
    is_retryable INTEGER NOT NULL,
    failed_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS delivery_records (
    record_id   TEXT PRIMARY KEY,
    schedule_id TEXT NOT NULL REFERENCES notification_schedules(schedule_id),
    clinic_id   TEXT NOT NULL,
    patient_id  TEXT NOT NULL,
    channel     TEXT NOT NULL,
    sent_at     TEXT NOT NULL,
    hour_of_day INTEGER NOT NULL,
    day_of_week INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS account_links_account_idx
    ON account_links(external_account_id);
CREATE INDEX IF NOT EXISTS account_links_patient_idx
    ON account_links(patient_id);
CREATE INDEX IF NOT EXISTS link_events_link_idx
    ON link_events(link_id);
CREATE INDEX IF NOT EXISTS claim_credentials_value_idx
    ON claim_credentials(value);
CREATE INDEX IF NOT EXISTS claim_credentials_patient_idx
    ON claim_credentials(patient_id);
CREATE INDEX IF NOT EXISTS schedules_due_idx
    ON notification_schedules(status, send_at);
CREATE INDEX IF NOT EXISTS schedules_patient_idx
    ON notification_schedules(patient_id);
CREATE INDEX IF NOT EXISTS appointments_patient_idx
    ON appointments(patient_id, start_at);
CREATE INDEX IF NOT EXISTS delivery_failures_schedule_idx
    ON delivery_failures(schedule_id);

PRAGMA user_version = 1;
";
