//! Per-table sync bookkeeping and freshness.

use std::{future::Future, time::Instant};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  patient::{Admission, Patient},
};

/// The authoritative hospital system, read-only.
///
/// Each call returns a full snapshot of the table; partial or incremental
/// reads are not supported.
pub trait HospitalSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn patients(
    &self,
  ) -> impl Future<Output = Result<Vec<Patient>, Self::Error>> + Send + '_;

  fn admissions(
    &self,
  ) -> impl Future<Output = Result<Vec<Admission>, Self::Error>> + Send + '_;
}

/// A table mirrored from the hospital system.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::Display,
  strum::EnumString,
  strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MirrorTable {
  Patients,
  Admissions,
}

impl MirrorTable {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownTable(s.to_owned()))
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncOutcome {
  Success,
  Failure,
}

/// Handed to the store with a snapshot so the recorded duration covers the
/// whole cycle, fetch and replacement included.
#[derive(Debug, Clone, Copy)]
pub struct SyncRun {
  pub attempted_at: DateTime<Utc>,
  pub started:      Instant,
}

impl SyncRun {
  pub fn start() -> Self {
    Self { attempted_at: Utc::now(), started: Instant::now() }
  }
}

/// The persisted state of one mirrored table.
///
/// `last_sync_at`, `last_duration_ms` and `last_row_count` describe the last
/// *successful* cycle; a failed cycle only touches the `last_attempt_at`,
/// `last_outcome` and `last_error` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
  pub table:            MirrorTable,
  pub last_sync_at:     Option<DateTime<Utc>>,
  pub last_duration_ms: Option<u64>,
  pub last_row_count:   Option<u64>,
  pub last_attempt_at:  DateTime<Utc>,
  pub last_outcome:     SyncOutcome,
  pub last_error:       Option<String>,
}

impl SyncState {
  /// Freshness measured from the last successful sync.
  pub fn freshness(&self, now: DateTime<Utc>, threshold: Duration) -> Freshness {
    freshness(self.last_sync_at, now, threshold)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
  pub is_stale:    bool,
  /// `None` when the table has never synced successfully.
  pub age_minutes: Option<i64>,
}

/// A table that has never synced is stale.
pub fn freshness(
  last_success: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
  threshold: Duration,
) -> Freshness {
  match last_success {
    Some(at) => {
      let age = now - at;
      Freshness { is_stale: age > threshold, age_minutes: Some(age.num_minutes()) }
    }
    None => Freshness { is_stale: true, age_minutes: None },
  }
}

/// A table's state together with its freshness, as reported to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
  pub table:     MirrorTable,
  #[serde(flatten)]
  pub freshness: Freshness,
  /// `None` until the first cycle for this table has run.
  pub state:     Option<SyncState>,
}
