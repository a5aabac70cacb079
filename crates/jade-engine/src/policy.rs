//! Tunables for the workers. Every field has a default, so an empty config
//! section is valid.

use std::time::Duration;

use chrono::NaiveDate;
use jade_core::scoring::Urgency;
use serde::Deserialize;

/// Call scheduling, dispatch and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Policy {
  /// Dispatch attempts per call, the first one included.
  pub max_attempts:          u32,
  pub retry_backoff_minutes: i64,
  /// Delay between midnight on the discharge date and the first attempt.
  pub call_offset_minutes:   i64,
  /// How far ahead of today the scheduler looks for discharges.
  pub lead_days:             i64,
  /// How far back the scheduler looks, to catch admissions that were
  /// mirrored late.
  pub lookback_days:         i64,
  /// Ceiling on one attempt, from connecting to the manager to hanging up.
  pub dialogue_timeout_secs: u64,
  pub dispatch_workers:      usize,
  pub dispatch_poll_secs:    u64,
  pub scheduler_tick_secs:   u64,
  /// Due calls fetched per dispatch poll.
  pub claim_batch:           usize,
  /// Slack on top of `dialogue_timeout_secs` before an `in_progress` claim
  /// counts as abandoned by its worker and is failed by the sweep.
  pub claim_grace_secs:      u64,
}

impl Default for Policy {
  fn default() -> Self {
    Self {
      max_attempts:          3,
      retry_backoff_minutes: 30,
      call_offset_minutes:   3 * 24 * 60,
      lead_days:             1,
      lookback_days:         30,
      dialogue_timeout_secs: 300,
      dispatch_workers:      2,
      dispatch_poll_secs:    15,
      scheduler_tick_secs:   60,
      claim_batch:           10,
      claim_grace_secs:      120,
    }
  }
}

impl Policy {
  pub fn retry_backoff(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.retry_backoff_minutes)
  }

  pub fn call_offset(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.call_offset_minutes)
  }

  pub fn dialogue_timeout(&self) -> Duration { Duration::from_secs(self.dialogue_timeout_secs) }

  /// Age past which no live attempt can still hold a claim.
  pub fn stale_claim_age(&self) -> chrono::Duration {
    let secs = self.dialogue_timeout_secs.saturating_add(self.claim_grace_secs);
    i64::try_from(secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .unwrap_or(chrono::Duration::MAX)
  }

  pub fn dispatch_poll(&self) -> Duration { Duration::from_secs(self.dispatch_poll_secs.max(1)) }

  pub fn scheduler_tick(&self) -> Duration { Duration::from_secs(self.scheduler_tick_secs.max(1)) }

  /// Discharge dates the scheduler considers on `today`, inclusive.
  pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (
      today - chrono::Duration::days(self.lookback_days),
      today + chrono::Duration::days(self.lead_days),
    )
  }

  /// Reject settings the workers cannot run with.
  pub fn validate(&self) -> Result<(), String> {
    if self.max_attempts == 0 {
      return Err("max_attempts must be at least 1".into());
    }
    if self.retry_backoff_minutes < 0 || self.call_offset_minutes < 0 {
      return Err("retry_backoff_minutes and call_offset_minutes must not be negative".into());
    }
    if self.lead_days < 0 || self.lookback_days < 0 {
      return Err("lead_days and lookback_days must not be negative".into());
    }
    if self.dispatch_workers == 0 || self.claim_batch == 0 {
      return Err("dispatch_workers and claim_batch must be at least 1".into());
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  /// Path of the SQLite export of the hospital system.
  pub source_path:       String,
  pub interval_minutes:  u64,
  pub staleness_minutes: i64,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      source_path:       "~/.local/share/jade/hospital.db".into(),
      interval_minutes:  10,
      staleness_minutes: 10,
    }
  }
}

impl SyncSettings {
  pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_minutes.max(1) * 60) }

  pub fn staleness(&self) -> chrono::Duration { chrono::Duration::minutes(self.staleness_minutes) }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
  /// Completed calls at or above this urgency raise a patient alert.
  pub urgency_threshold: Urgency,
}

impl Default for AlertSettings {
  fn default() -> Self { Self { urgency_threshold: Urgency::High } }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn window_spans_lookback_to_lead() {
    let policy = Policy::default();
    let today = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
    let (from, to) = policy.window(today);
    assert_eq!(from, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    assert_eq!(to, NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
  }

  #[test]
  fn defaults_are_valid() {
    Policy::default().validate().unwrap();
    let zero = Policy { max_attempts: 0, ..Policy::default() };
    assert!(zero.validate().is_err());
  }

  #[test]
  fn stale_claims_outlive_the_attempt_timeout() {
    let policy = Policy { dialogue_timeout_secs: 300, claim_grace_secs: 60, ..Policy::default() };
    assert_eq!(policy.stale_claim_age(), chrono::Duration::seconds(360));
    assert!(policy.stale_claim_age().to_std().unwrap() > policy.dialogue_timeout());
  }
}
