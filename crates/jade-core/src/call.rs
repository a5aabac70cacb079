//! The call lifecycle.
//!
//! A [`Call`] moves along a fixed graph:
//!
//! ```text
//!            schedule          claim              complete
//!   (none) ──────────► pending ─────► in_progress ─────────► called
//!                        ▲                 │
//!                        │ reschedule      │ fail
//!                        └───────────── failed
//! ```
//!
//! `failed` loops back to `pending` only while the attempt budget allows;
//! otherwise it is terminal. Every edge is a [`Transition`], and every
//! transition is recorded as one [`CallHistoryEntry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, dialogue::DialogueCapture, scoring::Assessment};

// ─── Status ──────────────────────────────────────────────────────────────────

/// The four canonical call states. Exactly one applies at any time.
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
pub enum CallStatus {
  Pending,
  InProgress,
  Called,
  Failed,
}

impl CallStatus {
  /// Parse the discriminant stored in the `status` column.
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownStatus(s.to_owned()))
  }
}

// ─── Transitions ─────────────────────────────────────────────────────────────

/// A legal edge of the lifecycle graph.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
  /// Creation by the scheduler.
  Schedule,
  /// Atomic claim by a dispatch worker.
  Claim,
  /// Answered session with a complete dialogue capture.
  Complete,
  /// Dial error or incomplete capture.
  Fail,
  /// Back into the queue after a retryable failure.
  Reschedule,
}

impl Transition {
  pub fn from(self) -> Option<CallStatus> {
    match self {
      Self::Schedule => None,
      Self::Claim => Some(CallStatus::Pending),
      Self::Complete | Self::Fail => Some(CallStatus::InProgress),
      Self::Reschedule => Some(CallStatus::Failed),
    }
  }

  pub fn to(self) -> CallStatus {
    match self {
      Self::Schedule | Self::Reschedule => CallStatus::Pending,
      Self::Claim => CallStatus::InProgress,
      Self::Complete => CallStatus::Called,
      Self::Fail => CallStatus::Failed,
    }
  }

  /// Look up the edge joining `from` and `to`, rejecting anything the graph
  /// does not contain.
  pub fn between(from: Option<CallStatus>, to: CallStatus) -> Result<Self> {
    use strum::IntoEnumIterator as _;
    Self::iter()
      .find(|t| t.from() == from && t.to() == to)
      .ok_or(Error::InvalidTransition { from, to })
  }
}

// ─── Call ────────────────────────────────────────────────────────────────────

/// One follow-up workflow instance, tied to exactly one admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
  pub call_id:         Uuid,
  pub patient_id:      String,
  pub admission_id:    String,
  pub status:          CallStatus,
  /// Planned dispatch time; moved forward on every reschedule.
  pub scheduled_at:    DateTime<Utc>,
  /// First time any attempt reached the patient's line.
  pub actual_at:       Option<DateTime<Utc>>,
  pub attempt_count:   u32,
  pub duration_secs:   Option<u32>,
  /// Set only by a completed dialogue.
  pub dialogue_result: Option<DialogueCapture>,
  /// Present only alongside a complete `dialogue_result`.
  pub score:           Option<Assessment>,
  /// Reason recorded by the most recent failed attempt.
  pub last_error:      Option<String>,
  /// Whatever the most recent failed attempt captured before it ended.
  /// Kept for audit only; never scored.
  pub last_partial:    Option<DialogueCapture>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl Call {
  /// Whether a `failed` call has used up its attempt budget.
  pub fn is_exhausted(&self, max_attempts: u32) -> bool {
    self.status == CallStatus::Failed && self.attempt_count >= max_attempts
  }
}

/// Input to [`crate::store::FollowupStore::schedule_call`].
#[derive(Debug, Clone)]
pub struct NewCall {
  pub patient_id:   String,
  pub admission_id: String,
  pub scheduled_at: DateTime<Utc>,
}

/// Everything committed by the `in_progress → called` transition.
#[derive(Debug, Clone)]
pub struct CallCompletion {
  pub connected_at:  DateTime<Utc>,
  pub duration_secs: u32,
  pub capture:       DialogueCapture,
  pub score:         Assessment,
}

/// Everything committed by the `in_progress → failed` transition and, when
/// `retry_at` is set, the follow-up `failed → pending` reschedule.
#[derive(Debug, Clone)]
pub struct CallFailure {
  pub reason:       String,
  /// Set when the attempt got as far as the patient's line.
  pub connected_at: Option<DateTime<Utc>>,
  /// The capture gathered before the attempt failed, if any.
  pub partial:      Option<DialogueCapture>,
  pub retry_at:     Option<DateTime<Utc>>,
}

// ─── History ─────────────────────────────────────────────────────────────────

/// Append-only audit record; one per transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallHistoryEntry {
  pub entry_id:     Uuid,
  pub call_id:      Uuid,
  /// `None` only for the scheduling entry that created the call.
  pub prior_status: Option<CallStatus>,
  pub new_status:   CallStatus,
  pub recorded_at:  DateTime<Utc>,
  pub reason:       String,
}

impl CallHistoryEntry {
  /// Build an entry for a known-legal transition.
  pub fn new(call_id: Uuid, transition: Transition, reason: impl Into<String>) -> Self {
    Self {
      entry_id: Uuid::new_v4(),
      call_id,
      prior_status: transition.from(),
      new_status: transition.to(),
      recorded_at: Utc::now(),
      reason: reason.into(),
    }
  }

  /// The edge this entry records, if it is a legal one.
  pub fn transition(&self) -> Result<Transition> {
    Transition::between(self.prior_status, self.new_status)
  }
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator as _;

  use super::*;

  #[test]
  fn every_transition_round_trips_through_between() {
    for t in Transition::iter() {
      assert_eq!(Transition::between(t.from(), t.to()).unwrap(), t);
    }
  }

  #[test]
  fn skipping_a_state_is_rejected() {
    use CallStatus::*;
    for (from, to) in [
      (Some(Pending), Called),
      (Some(Pending), Failed),
      (Some(Called), Pending),
      (Some(Failed), InProgress),
      (Some(InProgress), Pending),
      (None, InProgress),
    ] {
      assert!(
        matches!(Transition::between(from, to), Err(Error::InvalidTransition { .. })),
        "{from:?} -> {to:?} should be illegal"
      );
    }
  }

  #[test]
  fn status_discriminants() {
    assert_eq!(CallStatus::InProgress.as_ref(), "in_progress");
    assert_eq!(CallStatus::parse("called").unwrap(), CallStatus::Called);
    assert!(matches!(
      CallStatus::parse("APPELE"),
      Err(Error::UnknownStatus(_))
    ));
  }
}
