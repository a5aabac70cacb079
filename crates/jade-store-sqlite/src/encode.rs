//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are fixed-width RFC 3339 UTC strings (microsecond precision,
//! `Z` suffix) so that lexical order in SQL equals chronological order.
//! Dates are `YYYY-MM-DD`. Captures and assessments are compact JSON.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use jade_core::{
  call::{Call, CallHistoryEntry, CallStatus, Transition},
  patient::{Admission, Patient},
  sync::{MirrorTable, SyncOutcome, SyncState},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

fn decode_json<T: serde::de::DeserializeOwned>(s: Option<String>) -> Result<Option<T>> {
  Ok(s.as_deref().map(serde_json::from_str).transpose()?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawCall::from_row`].
pub const CALL_COLUMNS: &str = "call_id, patient_id, admission_id, status, scheduled_at, \
   actual_at, attempt_count, duration_secs, dialogue_json, assessment_json, \
   last_error, last_partial_json, created_at, updated_at";

/// Raw strings read directly from a `calls` row.
pub struct RawCall {
  pub call_id:           String,
  pub patient_id:        String,
  pub admission_id:      String,
  pub status:            String,
  pub scheduled_at:      String,
  pub actual_at:         Option<String>,
  pub attempt_count:     i64,
  pub duration_secs:     Option<i64>,
  pub dialogue_json:     Option<String>,
  pub assessment_json:   Option<String>,
  pub last_error:        Option<String>,
  pub last_partial_json: Option<String>,
  pub created_at:        String,
  pub updated_at:        String,
}

impl RawCall {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      call_id:           row.get(0)?,
      patient_id:        row.get(1)?,
      admission_id:      row.get(2)?,
      status:            row.get(3)?,
      scheduled_at:      row.get(4)?,
      actual_at:         row.get(5)?,
      attempt_count:     row.get(6)?,
      duration_secs:     row.get(7)?,
      dialogue_json:     row.get(8)?,
      assessment_json:   row.get(9)?,
      last_error:        row.get(10)?,
      last_partial_json: row.get(11)?,
      created_at:        row.get(12)?,
      updated_at:        row.get(13)?,
    })
  }

  pub fn into_call(self) -> Result<Call> {
    Ok(Call {
      call_id:         decode_uuid(&self.call_id)?,
      patient_id:      self.patient_id,
      admission_id:    self.admission_id,
      status:          CallStatus::parse(&self.status)?,
      scheduled_at:    decode_dt(&self.scheduled_at)?,
      actual_at:       decode_opt_dt(self.actual_at)?,
      attempt_count:   u32::try_from(self.attempt_count).unwrap_or(u32::MAX),
      duration_secs:   self.duration_secs.and_then(|d| u32::try_from(d).ok()),
      dialogue_result: decode_json(self.dialogue_json)?,
      score:           decode_json(self.assessment_json)?,
      last_error:      self.last_error,
      last_partial:    decode_json(self.last_partial_json)?,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawHistory {
  pub entry_id:     String,
  pub call_id:      String,
  pub prior_status: Option<String>,
  pub new_status:   String,
  pub recorded_at:  String,
  pub reason:       String,
}

impl RawHistory {
  pub fn into_entry(self) -> Result<CallHistoryEntry> {
    Ok(CallHistoryEntry {
      entry_id:     decode_uuid(&self.entry_id)?,
      call_id:      decode_uuid(&self.call_id)?,
      prior_status: self.prior_status.as_deref().map(CallStatus::parse).transpose()?,
      new_status:   CallStatus::parse(&self.new_status)?,
      recorded_at:  decode_dt(&self.recorded_at)?,
      reason:       self.reason,
    })
  }
}

/// A history entry ready for insertion.
pub struct HistoryRow {
  pub entry_id:     String,
  pub call_id:      String,
  pub prior_status: Option<String>,
  pub new_status:   String,
  pub recorded_at:  String,
  pub reason:       String,
}

impl HistoryRow {
  pub fn from_entry(entry: &CallHistoryEntry) -> Self {
    Self {
      entry_id:     encode_uuid(entry.entry_id),
      call_id:      encode_uuid(entry.call_id),
      prior_status: entry.prior_status.map(|s| s.as_ref().to_owned()),
      new_status:   entry.new_status.as_ref().to_owned(),
      recorded_at:  encode_dt(entry.recorded_at),
      reason:       entry.reason.clone(),
    }
  }

  /// Build a row inside a transaction, where only encoded values are at hand.
  pub fn new(call_id: &str, transition: Transition, at: &str, reason: String) -> Self {
    Self {
      entry_id: encode_uuid(Uuid::new_v4()),
      call_id: call_id.to_owned(),
      prior_status: transition.from().map(|s| s.as_ref().to_owned()),
      new_status: transition.to().as_ref().to_owned(),
      recorded_at: at.to_owned(),
      reason,
    }
  }

  pub fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
      "INSERT INTO call_history (
         entry_id, call_id, prior_status, new_status, recorded_at, reason
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      rusqlite::params![
        self.entry_id,
        self.call_id,
        self.prior_status,
        self.new_status,
        self.recorded_at,
        self.reason,
      ],
    )?;
    Ok(())
  }
}

pub const SYNC_COLUMNS: &str = "table_name, last_sync_at, last_duration_ms, last_row_count, \
   last_attempt_at, last_outcome, last_error";

pub struct RawSyncState {
  pub table_name:       String,
  pub last_sync_at:     Option<String>,
  pub last_duration_ms: Option<i64>,
  pub last_row_count:   Option<i64>,
  pub last_attempt_at:  String,
  pub last_outcome:     String,
  pub last_error:       Option<String>,
}

impl RawSyncState {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      table_name:       row.get(0)?,
      last_sync_at:     row.get(1)?,
      last_duration_ms: row.get(2)?,
      last_row_count:   row.get(3)?,
      last_attempt_at:  row.get(4)?,
      last_outcome:     row.get(5)?,
      last_error:       row.get(6)?,
    })
  }

  pub fn into_state(self) -> Result<SyncState> {
    Ok(SyncState {
      table:            MirrorTable::parse(&self.table_name)?,
      last_sync_at:     decode_opt_dt(self.last_sync_at)?,
      last_duration_ms: self.last_duration_ms.and_then(|v| u64::try_from(v).ok()),
      last_row_count:   self.last_row_count.and_then(|v| u64::try_from(v).ok()),
      last_attempt_at:  decode_dt(&self.last_attempt_at)?,
      last_outcome:     match self.last_outcome.as_str() {
        "success" => SyncOutcome::Success,
        _ => SyncOutcome::Failure,
      },
      last_error:       self.last_error,
    })
  }
}

pub const PATIENT_COLUMNS: &str = "patient_id, first_name, last_name, birth_date, phone";

pub struct RawPatient {
  pub patient_id: String,
  pub first_name: String,
  pub last_name:  String,
  pub birth_date: Option<String>,
  pub phone:      Option<String>,
}

impl RawPatient {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      patient_id: row.get(0)?,
      first_name: row.get(1)?,
      last_name:  row.get(2)?,
      birth_date: row.get(3)?,
      phone:      row.get(4)?,
    })
  }

  pub fn into_patient(self) -> Result<Patient> {
    Ok(Patient {
      birth_date: self.birth_date.as_deref().map(decode_date).transpose()?,
      patient_id: self.patient_id,
      first_name: self.first_name,
      last_name:  self.last_name,
      phone:      self.phone.filter(|p| !p.trim().is_empty()),
    })
  }
}

pub const ADMISSION_COLUMNS: &str =
  "admission_id, patient_id, discharge_date, service, physician, site";

pub struct RawAdmission {
  pub admission_id:   String,
  pub patient_id:     String,
  pub discharge_date: String,
  pub service:        Option<String>,
  pub physician:      Option<String>,
  pub site:           Option<String>,
}

impl RawAdmission {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      admission_id:   row.get(0)?,
      patient_id:     row.get(1)?,
      discharge_date: row.get(2)?,
      service:        row.get(3)?,
      physician:      row.get(4)?,
      site:           row.get(5)?,
    })
  }

  pub fn into_admission(self) -> Result<Admission> {
    Ok(Admission {
      discharge_date: decode_date(&self.discharge_date)?,
      admission_id:   self.admission_id,
      patient_id:     self.patient_id,
      service:        self.service,
      physician:      self.physician,
      site:           self.site,
    })
  }
}
