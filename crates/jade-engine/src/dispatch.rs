//! The retry manager: claims due calls, dials them, and commits every
//! outcome as a lifecycle transition.

use std::sync::Arc;

use chrono::Utc;
use jade_core::{
  call::{Call, CallCompletion, CallFailure},
  dialogue::DialogueCapture,
  scoring::{ScoringConfig, assess},
  store::FollowupStore,
};
use tracing::{debug, error, info, warn};

use crate::{
  AbortRegistry, DialError, DialOutcome, Dialer, DispatchGate, Error, Policy, Result,
  alerts::SCAN_LIMIT,
};

pub struct Dispatcher<S, D> {
  store:   Arc<S>,
  dialer:  Arc<D>,
  policy:  Arc<Policy>,
  scoring: Arc<ScoringConfig>,
  aborts:  AbortRegistry,
  gate:    DispatchGate,
}

impl<S, D> Dispatcher<S, D>
where
  S: FollowupStore,
  D: Dialer,
{
  pub fn new(
    store: Arc<S>,
    dialer: Arc<D>,
    policy: Arc<Policy>,
    scoring: Arc<ScoringConfig>,
    aborts: AbortRegistry,
    gate: DispatchGate,
  ) -> Self {
    Self { store, dialer, policy, scoring, aborts, gate }
  }

  /// Sweep abandoned claims, then claim and dial one batch of due calls,
  /// one at a time. Stops early if the gate closes. Returns how many
  /// attempts were made.
  ///
  /// Safe to run from several workers or processes at once: a call is only
  /// dialled by whoever wins its claim. An attempt whose outcome cannot be
  /// recorded is logged and left to a later sweep; the rest of the batch
  /// still runs.
  pub async fn dispatch_due(&self) -> Result<usize> {
    if let Err(e) = self.sweep_stale_claims().await {
      error!(error = %e, "stale claim sweep failed");
    }
    if !self.gate.is_open() {
      debug!("dispatch suspended; not claiming");
      return Ok(0);
    }
    let due = self
      .store
      .due_calls(Utc::now(), self.policy.claim_batch)
      .await
      .map_err(Error::store)?;

    let mut attempts = 0;
    for call in due {
      if !self.gate.is_open() {
        break;
      }
      let claimed = match self
        .store
        .claim_call(call.call_id, self.policy.max_attempts, Utc::now())
        .await
      {
        Ok(claimed) => claimed,
        Err(e) => {
          error!(call_id = %call.call_id, error = %e, "claim failed");
          continue;
        }
      };
      let Some(call) = claimed else {
        debug!(call_id = %call.call_id, "claimed elsewhere");
        continue;
      };
      attempts += 1;
      let call_id = call.call_id;
      if let Err(e) = self.attempt(call).await {
        error!(%call_id, error = %e, "attempt outcome not recorded; left for the stale claim sweep");
      }
    }
    Ok(attempts)
  }

  /// Dial a call this worker has claimed and commit the result.
  pub async fn attempt(&self, call: Call) -> Result<Call> {
    info!(
      call_id = %call.call_id,
      attempt = call.attempt_count,
      max_attempts = self.policy.max_attempts,
      "dialling"
    );

    let patient = self
      .store
      .get_patient(&call.patient_id)
      .await
      .map_err(Error::store)?;
    let outcome = match patient {
      Some(patient) => {
        let abort = self.aborts.register(call.call_id);
        self.dialer.dial(&call, &patient, abort).await
      }
      None => DialOutcome::failed(DialError::Transient(format!(
        "patient {} is no longer in the mirror",
        call.patient_id
      ))),
    };

    self.commit(&call, outcome).await
  }

  async fn commit(&self, call: &Call, outcome: DialOutcome) -> Result<Call> {
    match outcome {
      DialOutcome::Answered { connected_at, duration, capture } if capture.complete => {
        let score = assess(&capture, &self.scoring);
        let completion = CallCompletion {
          connected_at,
          duration_secs: u32::try_from(duration.as_secs()).unwrap_or(u32::MAX),
          capture,
          score,
        };
        let done = self
          .store
          .complete_call(call.call_id, completion)
          .await
          .map_err(Error::store)?;
        if let Some(score) = &done.score {
          info!(
            call_id = %done.call_id,
            score = score.score,
            urgency = %score.urgency,
            "follow-up completed"
          );
        }
        Ok(done)
      }

      DialOutcome::Answered { connected_at, capture, .. } => {
        let reason = capture
          .ended_early
          .clone()
          .unwrap_or_else(|| "dialogue incomplete".into());
        self.fail(call, reason, Some(connected_at), Some(capture)).await
      }

      DialOutcome::Failed { error, connected_at } => {
        if let DialError::Authentication(reason) = &error {
          self.gate.suspend(reason);
        }
        self.fail(call, error.to_string(), connected_at, None).await
      }
    }
  }

  async fn fail(
    &self,
    call: &Call,
    reason: String,
    connected_at: Option<chrono::DateTime<Utc>>,
    partial: Option<DialogueCapture>,
  ) -> Result<Call> {
    let failure = self.failure(call, reason, connected_at, partial);
    let failed = self
      .store
      .fail_call(call.call_id, failure.clone())
      .await
      .map_err(Error::store)?;
    log_failure(call, &failure);
    Ok(failed)
  }

  /// The failure to record for `call`, with a retry while attempts remain.
  fn failure(
    &self,
    call: &Call,
    reason: String,
    connected_at: Option<chrono::DateTime<Utc>>,
    partial: Option<DialogueCapture>,
  ) -> CallFailure {
    let retry_at = (call.attempt_count < self.policy.max_attempts)
      .then(|| Utc::now() + self.policy.retry_backoff());
    CallFailure { reason, connected_at, partial, retry_at }
  }

  /// Fail `in_progress` calls whose claim is older than any live attempt
  /// can be: their worker died with its process, or could not record the
  /// outcome. Claims younger than [`Policy::stale_claim_age`] are never
  /// touched, so this is safe while other processes are dialling.
  pub async fn sweep_stale_claims(&self) -> Result<usize> {
    let cutoff = Utc::now()
      .checked_sub_signed(self.policy.stale_claim_age())
      .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    let stale = self
      .store
      .stale_claims(cutoff, SCAN_LIMIT)
      .await
      .map_err(Error::store)?;

    let mut swept = 0;
    for call in stale {
      if self.aborts.is_active(call.call_id) {
        continue;
      }
      let failure = self.failure(&call, ABANDONED.into(), None, None);
      let failed = self
        .store
        .fail_stale_claim(call.call_id, cutoff, failure.clone())
        .await
        .map_err(Error::store)?;
      if failed.is_some() {
        log_failure(&call, &failure);
        swept += 1;
      }
    }
    if swept > 0 {
      info!(swept, "failed abandoned attempts");
    }
    Ok(swept)
  }
}

/// Reason recorded when the sweep fails an abandoned claim.
const ABANDONED: &str = "attempt abandoned: no outcome recorded in time";

fn log_failure(call: &Call, failure: &CallFailure) {
  let reason = &failure.reason;
  match failure.retry_at {
    Some(at) => warn!(
      call_id = %call.call_id,
      attempt = call.attempt_count,
      %reason,
      retry_at = %at,
      "attempt failed; rescheduled"
    ),
    None => error!(
      call_id = %call.call_id,
      attempt = call.attempt_count,
      %reason,
      "attempt failed; no attempts left"
    ),
  }
}
