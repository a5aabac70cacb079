//! The `FollowupStore` trait and supporting query types.
//!
//! Implemented by storage backends (e.g. `jade-store-sqlite`). The engine and
//! the query API depend on this abstraction, not on a concrete backend.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  call::{
    Call, CallCompletion, CallFailure, CallHistoryEntry, CallStatus, NewCall,
  },
  patient::{Admission, Patient},
  scoring::Urgency,
  sync::{MirrorTable, SyncRun, SyncState},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`FollowupStore::list_calls`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallQuery {
  pub status:           Option<CallStatus>,
  /// Only scored calls at or above this urgency.
  pub min_urgency:      Option<Urgency>,
  pub min_attempts:     Option<u32>,
  pub patient_id:       Option<String>,
  pub admission_id:     Option<String>,
  pub scheduled_after:  Option<DateTime<Utc>>,
  pub scheduled_before: Option<DateTime<Utc>>,
  pub limit:            Option<usize>,
  pub offset:           Option<usize>,
}

/// Aggregates over all calls. See [`FollowupStore::call_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
  pub total:                 u64,
  pub pending:               u64,
  pub in_progress:           u64,
  pub called:                u64,
  pub failed:                u64,
  /// `failed` calls with no attempts left.
  pub exhausted:             u64,
  /// `pending` calls whose `scheduled_at` has passed.
  pub due_now:               u64,
  pub low:                   u64,
  pub medium:                u64,
  pub high:                  u64,
  pub critical:              u64,
  pub average_duration_secs: Option<f64>,
  pub average_score:         Option<f64>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the operational store.
///
/// Every call status change goes through one of `schedule_call`,
/// `claim_call`, `complete_call` or `fail_call`, each of which commits the
/// matching [`CallHistoryEntry`] rows atomically with the change. If the
/// history write fails, the status change does not happen.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait FollowupStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Mirrored tables ───────────────────────────────────────────────────

  /// Replace the whole patient mirror with `rows` and record a successful
  /// sync. Readers see either the old or the new snapshot.
  fn replace_patients(
    &self,
    rows: Vec<Patient>,
    run: SyncRun,
  ) -> impl Future<Output = Result<SyncState, Self::Error>> + Send + '_;

  /// Replace the whole admission mirror with `rows` and record a successful
  /// sync.
  fn replace_admissions(
    &self,
    rows: Vec<Admission>,
    run: SyncRun,
  ) -> impl Future<Output = Result<SyncState, Self::Error>> + Send + '_;

  /// Record a failed cycle. The mirror and the last-success fields are left
  /// untouched.
  fn record_sync_failure(
    &self,
    table: MirrorTable,
    run: SyncRun,
    error: String,
  ) -> impl Future<Output = Result<SyncState, Self::Error>> + Send + '_;

  /// One entry per table that has been synced (or attempted) at least once.
  fn sync_states(
    &self,
  ) -> impl Future<Output = Result<Vec<SyncState>, Self::Error>> + Send + '_;

  fn get_patient<'a>(
    &'a self,
    patient_id: &'a str,
  ) -> impl Future<Output = Result<Option<Patient>, Self::Error>> + Send + 'a;

  fn get_admission<'a>(
    &'a self,
    admission_id: &'a str,
  ) -> impl Future<Output = Result<Option<Admission>, Self::Error>> + Send + 'a;

  /// Admissions discharged within `from..=to` that have no call yet.
  fn unscheduled_admissions(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> impl Future<Output = Result<Vec<Admission>, Self::Error>> + Send + '_;

  // ── Call lifecycle ────────────────────────────────────────────────────

  /// Create a `pending` call. Returns `None` when the admission already has
  /// a call; uniqueness is enforced by the store, not the caller.
  fn schedule_call(
    &self,
    input: NewCall,
  ) -> impl Future<Output = Result<Option<Call>, Self::Error>> + Send + '_;

  /// `pending` calls with `scheduled_at <= now`, oldest first.
  fn due_calls(
    &self,
    now: DateTime<Utc>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Call>, Self::Error>> + Send + '_;

  /// Atomically move a due `pending` call to `in_progress` and count the
  /// attempt. Returns `None` when another worker got there first, the call is
  /// no longer due, or its attempt budget is spent.
  fn claim_call(
    &self,
    call_id: Uuid,
    max_attempts: u32,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Call>, Self::Error>> + Send + '_;

  /// `in_progress → called`, storing the capture and its score.
  fn complete_call(
    &self,
    call_id: Uuid,
    completion: CallCompletion,
  ) -> impl Future<Output = Result<Call, Self::Error>> + Send + '_;

  /// `in_progress → failed`, then `failed → pending` when
  /// `failure.retry_at` is set.
  fn fail_call(
    &self,
    call_id: Uuid,
    failure: CallFailure,
  ) -> impl Future<Output = Result<Call, Self::Error>> + Send + '_;

  /// `in_progress` calls claimed before `claimed_before`, oldest claim first.
  fn stale_claims(
    &self,
    claimed_before: DateTime<Utc>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Call>, Self::Error>> + Send + '_;

  /// [`fail_call`](Self::fail_call), but only while the call is still
  /// `in_progress` under a claim taken before `claimed_before`. Returns
  /// `None` when the call was re-claimed or has already moved on, so a sweep
  /// never fails an attempt that a live worker is still running.
  fn fail_stale_claim(
    &self,
    call_id: Uuid,
    claimed_before: DateTime<Utc>,
    failure: CallFailure,
  ) -> impl Future<Output = Result<Option<Call>, Self::Error>> + Send + '_;

  fn get_call(
    &self,
    call_id: Uuid,
  ) -> impl Future<Output = Result<Option<Call>, Self::Error>> + Send + '_;

  /// Matching calls, most recently scheduled first.
  fn list_calls(
    &self,
    query: CallQuery,
  ) -> impl Future<Output = Result<Vec<Call>, Self::Error>> + Send + '_;

  fn call_stats(
    &self,
    now: DateTime<Utc>,
    max_attempts: u32,
  ) -> impl Future<Output = Result<CallStats, Self::Error>> + Send + '_;

  // ── Audit log ─────────────────────────────────────────────────────────

  /// Append an entry for a transition the call has just made. Rejects
  /// entries whose edge is not in the lifecycle graph or whose `new_status`
  /// does not match the call's current status.
  fn append_history(
    &self,
    entry: CallHistoryEntry,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The audit trail of one call, oldest first.
  fn call_history(
    &self,
    call_id: Uuid,
  ) -> impl Future<Output = Result<Vec<CallHistoryEntry>, Self::Error>> + Send + '_;
}
