//! [`SqliteStore`]: the SQLite implementation of [`FollowupStore`].

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use jade_core::{
  call::{
    Call, CallCompletion, CallFailure, CallHistoryEntry, CallStatus, NewCall,
    Transition,
  },
  patient::{Admission, Patient},
  scoring::Urgency,
  store::{CallQuery, CallStats, FollowupStore},
  sync::{MirrorTable, SyncRun, SyncState},
};
use rusqlite::{OptionalExtension as _, TransactionBehavior, types::Value};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    ADMISSION_COLUMNS, CALL_COLUMNS, HistoryRow, PATIENT_COLUMNS, RawAdmission,
    RawCall, RawHistory, RawPatient, RawSyncState, SYNC_COLUMNS, encode_date,
    encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// The operational store, backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. Several
/// processes may open the same file: every write runs in an `IMMEDIATE`
/// transaction and every status change is a conditional update.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Result of a conditional status update.
enum Applied {
  Done(RawCall),
  /// No row changed; carries the call's actual status, or `None` if the call
  /// does not exist.
  Rejected(Option<String>),
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
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

  /// Run raw SQL against the store's connection.
  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Turn an [`Applied`] into the updated call or the matching error.
  fn applied(call_id: Uuid, expected: CallStatus, applied: Applied) -> Result<Call> {
    match applied {
      Applied::Done(raw) => raw.into_call(),
      Applied::Rejected(None) => Err(Error::CallNotFound(call_id)),
      Applied::Rejected(Some(found)) => Err(Error::Conflict {
        call_id,
        expected,
        found: CallStatus::parse(&found)?,
      }),
    }
  }

  /// `in_progress → failed`, plus the reschedule when `failure.retry_at` is
  /// set. With `claimed_before`, only a claim older than that is failed.
  async fn fail_in_progress(
    &self,
    call_id: Uuid,
    failure: CallFailure,
    claimed_before: Option<DateTime<Utc>>,
  ) -> Result<Applied> {
    let id            = encode_uuid(call_id);
    let now_str       = encode_dt(Utc::now());
    let connected_str = failure.connected_at.map(encode_dt);
    let partial_json  = failure.partial.as_ref().map(serde_json::to_string).transpose()?;
    let retry_str     = failure.retry_at.map(encode_dt);
    let before_str    = claimed_before.map(encode_dt);
    let reason        = failure.reason;

    let applied = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
          "UPDATE calls
           SET status            = 'failed',
               actual_at         = COALESCE(actual_at, ?2),
               last_error        = ?3,
               last_partial_json = ?4,
               updated_at        = ?5
           WHERE call_id = ?1
             AND status = 'in_progress'
             AND (?6 IS NULL OR updated_at < ?6)",
          rusqlite::params![id, connected_str, reason, partial_json, now_str, before_str],
        )?;
        if n == 0 {
          return Ok(Applied::Rejected(load_status(&tx, &id)?));
        }
        HistoryRow::new(&id, Transition::Fail, &now_str, reason).insert(&tx)?;

        if let Some(retry_at) = retry_str {
          tx.execute(
            "UPDATE calls SET status = 'pending', scheduled_at = ?2, updated_at = ?3
             WHERE call_id = ?1 AND status = 'failed'",
            rusqlite::params![id, retry_at, now_str],
          )?;
          HistoryRow::new(
            &id,
            Transition::Reschedule,
            &now_str,
            format!("retry scheduled for {retry_at}"),
          )
          .insert(&tx)?;
        }

        let raw = load_call(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Applied::Done(raw))
      })
      .await?;
    Ok(applied)
  }

  async fn replace_mirror(
    &self,
    table: MirrorTable,
    insert_sql: &'static str,
    rows: Vec<Vec<Value>>,
    run: SyncRun,
  ) -> Result<SyncState> {
    let table_name = table.as_ref().to_owned();
    let attempted = encode_dt(run.attempted_at);

    let raw: RawSyncState = self
      .conn
      .call(move |conn| {
        // The new snapshot becomes visible to readers only at commit.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(&format!("DELETE FROM {table_name}"), [])?;
        {
          let mut stmt = tx.prepare(insert_sql)?;
          for row in &rows {
            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
          }
        }
        let row_count = rows.len() as i64;
        let duration_ms = i64::try_from(run.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        tx.execute(
          "INSERT INTO sync_state (
             table_name, last_sync_at, last_duration_ms, last_row_count,
             last_attempt_at, last_outcome, last_error
           ) VALUES (?1, ?2, ?3, ?4, ?2, 'success', NULL)
           ON CONFLICT(table_name) DO UPDATE SET
             last_sync_at     = excluded.last_sync_at,
             last_duration_ms = excluded.last_duration_ms,
             last_row_count   = excluded.last_row_count,
             last_attempt_at  = excluded.last_attempt_at,
             last_outcome     = 'success',
             last_error       = NULL",
          rusqlite::params![table_name, attempted, duration_ms, row_count],
        )?;
        let state = load_sync_state(&tx, &table_name)?;
        tx.commit()?;
        Ok(state)
      })
      .await?;

    debug!(table = %table, rows = ?raw.last_row_count, "mirror replaced");
    raw.into_state()
  }
}

fn text(s: impl Into<String>) -> Value { Value::Text(s.into()) }

fn opt_text(s: Option<String>) -> Value { s.map_or(Value::Null, Value::Text) }

fn load_call(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<RawCall>> {
  conn
    .query_row(
      &format!("SELECT {CALL_COLUMNS} FROM calls WHERE call_id = ?1"),
      rusqlite::params![id],
      RawCall::from_row,
    )
    .optional()
}

fn load_status(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<String>> {
  conn
    .query_row(
      "SELECT status FROM calls WHERE call_id = ?1",
      rusqlite::params![id],
      |row| row.get(0),
    )
    .optional()
}

fn load_sync_state(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<RawSyncState> {
  conn.query_row(
    &format!("SELECT {SYNC_COLUMNS} FROM sync_state WHERE table_name = ?1"),
    rusqlite::params![table],
    RawSyncState::from_row,
  )
}

/// Ordinal used to compare urgencies in SQL.
fn urgency_rank(u: Urgency) -> i64 {
  match u {
    Urgency::Low => 0,
    Urgency::Medium => 1,
    Urgency::High => 2,
    Urgency::Critical => 3,
  }
}

// ─── FollowupStore impl ──────────────────────────────────────────────────────

impl FollowupStore for SqliteStore {
  type Error = Error;

  // ── Mirrored tables ───────────────────────────────────────────────────────

  async fn replace_patients(&self, rows: Vec<Patient>, run: SyncRun) -> Result<SyncState> {
    let rows = rows
      .into_iter()
      .map(|p| {
        vec![
          text(p.patient_id),
          text(p.first_name),
          text(p.last_name),
          opt_text(p.birth_date.map(encode_date)),
          opt_text(p.phone),
        ]
      })
      .collect();
    self
      .replace_mirror(
        MirrorTable::Patients,
        "INSERT INTO patients (patient_id, first_name, last_name, birth_date, phone)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rows,
        run,
      )
      .await
  }

  async fn replace_admissions(&self, rows: Vec<Admission>, run: SyncRun) -> Result<SyncState> {
    let rows = rows
      .into_iter()
      .map(|a| {
        vec![
          text(a.admission_id),
          text(a.patient_id),
          text(encode_date(a.discharge_date)),
          opt_text(a.service),
          opt_text(a.physician),
          opt_text(a.site),
        ]
      })
      .collect();
    self
      .replace_mirror(
        MirrorTable::Admissions,
        "INSERT INTO admissions (
           admission_id, patient_id, discharge_date, service, physician, site
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rows,
        run,
      )
      .await
  }

  async fn record_sync_failure(
    &self,
    table: MirrorTable,
    run: SyncRun,
    error: String,
  ) -> Result<SyncState> {
    let table_name = table.as_ref().to_owned();
    let attempted = encode_dt(run.attempted_at);

    let raw: RawSyncState = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sync_state (table_name, last_attempt_at, last_outcome, last_error)
           VALUES (?1, ?2, 'failure', ?3)
           ON CONFLICT(table_name) DO UPDATE SET
             last_attempt_at = excluded.last_attempt_at,
             last_outcome    = 'failure',
             last_error      = excluded.last_error",
          rusqlite::params![table_name, attempted, error],
        )?;
        Ok(load_sync_state(conn, &table_name)?)
      })
      .await?;

    raw.into_state()
  }

  async fn sync_states(&self) -> Result<Vec<SyncState>> {
    let raws: Vec<RawSyncState> = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare(&format!("SELECT {SYNC_COLUMNS} FROM sync_state ORDER BY table_name"))?;
        let rows = stmt
          .query_map([], RawSyncState::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSyncState::into_state).collect()
  }

  async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
    let id = patient_id.to_owned();
    let raw: Option<RawPatient> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE patient_id = ?1"),
              rusqlite::params![id],
              RawPatient::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPatient::into_patient).transpose()
  }

  async fn get_admission(&self, admission_id: &str) -> Result<Option<Admission>> {
    let id = admission_id.to_owned();
    let raw: Option<RawAdmission> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ADMISSION_COLUMNS} FROM admissions WHERE admission_id = ?1"),
              rusqlite::params![id],
              RawAdmission::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAdmission::into_admission).transpose()
  }

  async fn unscheduled_admissions(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<Admission>> {
    let (from, to) = (encode_date(from), encode_date(to));
    let raws: Vec<RawAdmission> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT a.admission_id, a.patient_id, a.discharge_date,
                  a.service, a.physician, a.site
           FROM admissions a
           LEFT JOIN calls c ON c.admission_id = a.admission_id
           WHERE c.call_id IS NULL
             AND a.discharge_date BETWEEN ?1 AND ?2
           ORDER BY a.discharge_date, a.admission_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![from, to], RawAdmission::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAdmission::into_admission).collect()
  }

  // ── Call lifecycle ────────────────────────────────────────────────────────

  async fn schedule_call(&self, input: NewCall) -> Result<Option<Call>> {
    let now = Utc::now();
    let call = Call {
      call_id:         Uuid::new_v4(),
      patient_id:      input.patient_id,
      admission_id:    input.admission_id,
      status:          CallStatus::Pending,
      scheduled_at:    input.scheduled_at,
      actual_at:       None,
      attempt_count:   0,
      duration_secs:   None,
      dialogue_result: None,
      score:           None,
      last_error:      None,
      last_partial:    None,
      created_at:      now,
      updated_at:      now,
    };
    let history = HistoryRow::from_entry(&CallHistoryEntry::new(
      call.call_id,
      Transition::Schedule,
      "scheduled",
    ));

    let id_str        = encode_uuid(call.call_id);
    let patient_id    = call.patient_id.clone();
    let admission_id  = call.admission_id.clone();
    let scheduled_str = encode_dt(call.scheduled_at);
    let now_str       = encode_dt(now);

    let inserted: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
          "INSERT INTO calls (
             call_id, patient_id, admission_id, status, scheduled_at,
             attempt_count, created_at, updated_at
           ) VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?5, ?5)
           ON CONFLICT(admission_id) DO NOTHING",
          rusqlite::params![id_str, patient_id, admission_id, scheduled_str, now_str],
        )?;
        if n == 0 {
          return Ok(false);
        }
        history.insert(&tx)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(inserted.then_some(call))
  }

  async fn due_calls(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Call>> {
    let now_str = encode_dt(now);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawCall> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CALL_COLUMNS} FROM calls
           WHERE status = 'pending' AND scheduled_at <= ?1
           ORDER BY scheduled_at
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![now_str, limit], RawCall::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCall::into_call).collect()
  }

  async fn claim_call(
    &self,
    call_id: Uuid,
    max_attempts: u32,
    now: DateTime<Utc>,
  ) -> Result<Option<Call>> {
    let id = encode_uuid(call_id);
    let now_str = encode_dt(now);

    let raw: Option<RawCall> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // The compare-and-set: only one worker can move a given call out of
        // `pending`.
        let n = tx.execute(
          "UPDATE calls
           SET status = 'in_progress',
               attempt_count = attempt_count + 1,
               updated_at = ?2
           WHERE call_id = ?1
             AND status = 'pending'
             AND scheduled_at <= ?2
             AND attempt_count < ?3",
          rusqlite::params![id, now_str, max_attempts],
        )?;
        if n == 0 {
          return Ok(None);
        }
        let raw = tx.query_row(
          &format!("SELECT {CALL_COLUMNS} FROM calls WHERE call_id = ?1"),
          rusqlite::params![id],
          RawCall::from_row,
        )?;
        HistoryRow::new(
          &id,
          Transition::Claim,
          &now_str,
          format!("attempt {} of {max_attempts}", raw.attempt_count),
        )
        .insert(&tx)?;
        tx.commit()?;
        Ok(Some(raw))
      })
      .await?;

    raw.map(RawCall::into_call).transpose()
  }

  async fn complete_call(&self, call_id: Uuid, completion: CallCompletion) -> Result<Call> {
    if !completion.capture.complete {
      return Err(Error::IncompleteCapture(call_id));
    }

    let id              = encode_uuid(call_id);
    let now_str         = encode_dt(Utc::now());
    let connected_str   = encode_dt(completion.connected_at);
    let duration        = i64::from(completion.duration_secs);
    let dialogue_json   = serde_json::to_string(&completion.capture)?;
    let assessment_json = serde_json::to_string(&completion.score)?;
    let score           = completion.score.score;
    let urgency         = completion.score.urgency;
    let reason          = format!("completed: {urgency}, score {score:.0}");
    let urgency_str     = urgency.as_ref().to_owned();

    let applied = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
          "UPDATE calls
           SET status          = 'called',
               actual_at       = COALESCE(actual_at, ?2),
               duration_secs   = ?3,
               dialogue_json   = ?4,
               score           = ?5,
               urgency         = ?6,
               assessment_json = ?7,
               last_error      = NULL,
               updated_at      = ?8
           WHERE call_id = ?1 AND status = 'in_progress'",
          rusqlite::params![
            id,
            connected_str,
            duration,
            dialogue_json,
            score,
            urgency_str,
            assessment_json,
            now_str,
          ],
        )?;
        if n == 0 {
          return Ok(Applied::Rejected(load_status(&tx, &id)?));
        }
        HistoryRow::new(&id, Transition::Complete, &now_str, reason).insert(&tx)?;
        let raw = load_call(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(Applied::Done(raw))
      })
      .await?;

    Self::applied(call_id, CallStatus::InProgress, applied)
  }

  async fn fail_call(&self, call_id: Uuid, failure: CallFailure) -> Result<Call> {
    let applied = self.fail_in_progress(call_id, failure, None).await?;
    Self::applied(call_id, CallStatus::InProgress, applied)
  }

  async fn stale_claims(
    &self,
    claimed_before: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<Call>> {
    let before = encode_dt(claimed_before);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawCall> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CALL_COLUMNS} FROM calls
           WHERE status = 'in_progress' AND updated_at < ?1
           ORDER BY updated_at
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![before, limit], RawCall::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCall::into_call).collect()
  }

  async fn fail_stale_claim(
    &self,
    call_id: Uuid,
    claimed_before: DateTime<Utc>,
    failure: CallFailure,
  ) -> Result<Option<Call>> {
    match self.fail_in_progress(call_id, failure, Some(claimed_before)).await? {
      Applied::Done(raw) => raw.into_call().map(Some),
      Applied::Rejected(_) => Ok(None),
    }
  }

  async fn get_call(&self, call_id: Uuid) -> Result<Option<Call>> {
    let id = encode_uuid(call_id);
    let raw = self.conn.call(move |conn| Ok(load_call(conn, &id)?)).await?;
    raw.map(RawCall::into_call).transpose()
  }

  async fn list_calls(&self, query: CallQuery) -> Result<Vec<Call>> {
    let status       = query.status.map(|s| s.as_ref().to_owned());
    let min_urgency  = query.min_urgency.map(urgency_rank);
    let min_attempts = query.min_attempts;
    let patient_id   = query.patient_id;
    let admission_id = query.admission_id;
    let after        = query.scheduled_after.map(encode_dt);
    let before       = query.scheduled_before.map(encode_dt);
    let limit        = query.limit.unwrap_or(100) as i64;
    let offset       = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawCall> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CALL_COLUMNS} FROM calls
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR (CASE urgency
                                   WHEN 'low'      THEN 0
                                   WHEN 'medium'   THEN 1
                                   WHEN 'high'     THEN 2
                                   WHEN 'critical' THEN 3
                                 END) >= ?2)
             AND (?3 IS NULL OR attempt_count >= ?3)
             AND (?4 IS NULL OR patient_id = ?4)
             AND (?5 IS NULL OR admission_id = ?5)
             AND (?6 IS NULL OR scheduled_at >= ?6)
             AND (?7 IS NULL OR scheduled_at <= ?7)
           ORDER BY scheduled_at DESC, call_id
           LIMIT ?8 OFFSET ?9"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              status,
              min_urgency,
              min_attempts,
              patient_id,
              admission_id,
              after,
              before,
              limit,
              offset,
            ],
            RawCall::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCall::into_call).collect()
  }

  async fn call_stats(&self, now: DateTime<Utc>, max_attempts: u32) -> Result<CallStats> {
    let now_str = encode_dt(now);
    let stats = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT
             COUNT(*),
             COALESCE(SUM(status = 'pending'), 0),
             COALESCE(SUM(status = 'in_progress'), 0),
             COALESCE(SUM(status = 'called'), 0),
             COALESCE(SUM(status = 'failed'), 0),
             COALESCE(SUM(status = 'failed' AND attempt_count >= ?2), 0),
             COALESCE(SUM(status = 'pending' AND scheduled_at <= ?1), 0),
             COALESCE(SUM(urgency = 'low'), 0),
             COALESCE(SUM(urgency = 'medium'), 0),
             COALESCE(SUM(urgency = 'high'), 0),
             COALESCE(SUM(urgency = 'critical'), 0),
             AVG(duration_secs),
             AVG(score)
           FROM calls",
          rusqlite::params![now_str, max_attempts],
          |row| {
            let count = |i: usize| row.get::<_, i64>(i).map(|v| v.max(0) as u64);
            Ok(CallStats {
              total:                 count(0)?,
              pending:               count(1)?,
              in_progress:           count(2)?,
              called:                count(3)?,
              failed:                count(4)?,
              exhausted:             count(5)?,
              due_now:               count(6)?,
              low:                   count(7)?,
              medium:                count(8)?,
              high:                  count(9)?,
              critical:              count(10)?,
              average_duration_secs: row.get(11)?,
              average_score:         row.get(12)?,
            })
          },
        )?)
      })
      .await?;
    Ok(stats)
  }

  // ── Audit log ─────────────────────────────────────────────────────────────

  async fn append_history(&self, entry: CallHistoryEntry) -> Result<()> {
    entry.transition()?;
    let call_id = entry.call_id;
    let expected = entry.new_status;
    let row = HistoryRow::from_entry(&entry);

    let applied: Option<Option<String>> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let status = load_status(&tx, &row.call_id)?;
        if status.as_deref() != Some(row.new_status.as_str()) {
          return Ok(Some(status));
        }
        row.insert(&tx)?;
        tx.commit()?;
        Ok(None)
      })
      .await?;

    match applied {
      None => Ok(()),
      Some(None) => Err(Error::CallNotFound(call_id)),
      Some(Some(found)) => Err(Error::Conflict {
        call_id,
        expected,
        found: CallStatus::parse(&found)?,
      }),
    }
  }

  async fn call_history(&self, call_id: Uuid) -> Result<Vec<CallHistoryEntry>> {
    let id = encode_uuid(call_id);
    let raws: Vec<RawHistory> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, call_id, prior_status, new_status, recorded_at, reason
           FROM call_history
           WHERE call_id = ?1
           ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id], |row| {
            Ok(RawHistory {
              entry_id:     row.get(0)?,
              call_id:      row.get(1)?,
              prior_status: row.get(2)?,
              new_status:   row.get(3)?,
              recorded_at:  row.get(4)?,
              reason:       row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistory::into_entry).collect()
  }
}
