//! SQL schema for the Jade SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

-- Mirrors of the hospital system. Replaced wholesale on every sync cycle.
CREATE TABLE IF NOT EXISTS patients (
    patient_id  TEXT PRIMARY KEY,
    first_name  TEXT NOT NULL,
    last_name   TEXT NOT NULL,
    birth_date  TEXT,            -- YYYY-MM-DD
    phone       TEXT
);

CREATE TABLE IF NOT EXISTS admissions (
    admission_id   TEXT PRIMARY KEY,
    patient_id     TEXT NOT NULL,
    discharge_date TEXT NOT NULL,   -- YYYY-MM-DD
    service        TEXT,
    physician      TEXT,
    site           TEXT
);

-- Calls refer to mirrored rows by source id only, so replacing a mirror
-- never touches call state.
CREATE TABLE IF NOT EXISTS calls (
    call_id           TEXT PRIMARY KEY,
    patient_id        TEXT NOT NULL,
    admission_id      TEXT NOT NULL UNIQUE,
    status            TEXT NOT NULL
                      CHECK (status IN ('pending', 'in_progress', 'called', 'failed')),
    scheduled_at      TEXT NOT NULL,   -- fixed-width RFC 3339 UTC
    actual_at         TEXT,
    attempt_count     INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
    duration_secs     INTEGER,
    dialogue_json     TEXT,
    score             REAL,
    urgency           TEXT,
    assessment_json   TEXT,
    last_error        TEXT,
    last_partial_json TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    CHECK ((status = 'called') = (dialogue_json IS NOT NULL)),
    CHECK ((score IS NULL) = (dialogue_json IS NULL)),
    CHECK ((score IS NULL) = (assessment_json IS NULL))
);

CREATE INDEX IF NOT EXISTS calls_due_idx ON calls(status, scheduled_at);

-- Strictly append-only; the triggers below reject UPDATE and DELETE.
CREATE TABLE IF NOT EXISTS call_history (
    entry_id      TEXT NOT NULL UNIQUE,
    call_id       TEXT NOT NULL REFERENCES calls(call_id),
    prior_status  TEXT,   -- NULL only for the scheduling entry
    new_status    TEXT NOT NULL,
    recorded_at   TEXT NOT NULL,
    reason        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS call_history_call_idx ON call_history(call_id);

CREATE TRIGGER IF NOT EXISTS call_history_no_update
BEFORE UPDATE ON call_history
BEGIN
    SELECT RAISE(ABORT, 'call_history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS call_history_no_delete
BEFORE DELETE ON call_history
BEGIN
    SELECT RAISE(ABORT, 'call_history is append-only');
END;

CREATE TABLE IF NOT EXISTS sync_state (
    table_name       TEXT PRIMARY KEY,
    last_sync_at     TEXT,      -- last successful cycle
    last_duration_ms INTEGER,
    last_row_count   INTEGER,
    last_attempt_at  TEXT NOT NULL,
    last_outcome     TEXT NOT NULL CHECK (last_outcome IN ('success', 'failure')),
    last_error       TEXT
);

PRAGMA user_version = 1;
";
