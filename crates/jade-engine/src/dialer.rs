//! The seam between the dispatcher and the telephone.
//!
//! A [`Dialer`] performs one complete attempt: it reaches the patient, runs
//! the dialogue and hangs up. It never touches call state; the
//! [`crate::Dispatcher`] commits whatever [`DialOutcome`] it returns.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use jade_ami::{ManagerConfig, Session};
use jade_core::{
  call::Call,
  dialogue::{self, DialogueCapture, Script},
  patient::Patient,
};
use thiserror::Error;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info};

use crate::AbortSignal;

/// Why an attempt did not produce a dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
  /// The manager refused our credentials. Retrying cannot help until they
  /// change.
  #[error("manager authentication failed: {0}")]
  Authentication(String),

  /// Network trouble, a busy or unanswered line, a hang-up or a timeout.
  #[error("{0}")]
  Transient(String),

  #[error("aborted")]
  Aborted,
}

impl From<jade_ami::Error> for DialError {
  fn from(e: jade_ami::Error) -> Self {
    match e {
      jade_ami::Error::Authentication(reason) => Self::Authentication(reason),
      other => Self::Transient(other.to_string()),
    }
  }
}

#[derive(Debug, Clone)]
pub enum DialOutcome {
  /// The patient picked up and the dialogue ran to an end. The capture may
  /// still be incomplete.
  Answered {
    connected_at: DateTime<Utc>,
    duration:     Duration,
    capture:      DialogueCapture,
  },
  Failed {
    error:        DialError,
    /// Set when the attempt reached the patient's line before failing.
    connected_at: Option<DateTime<Utc>>,
  },
}

impl DialOutcome {
  pub fn failed(error: DialError) -> Self { Self::Failed { error, connected_at: None } }
}

pub trait Dialer: Send + Sync + 'static {
  /// Call `patient` about `call` and run the dialogue. Must return promptly
  /// once `abort` fires, with [`DialError::Aborted`].
  fn dial<'a>(
    &'a self,
    call: &'a Call,
    patient: &'a Patient,
    abort: AbortSignal,
  ) -> impl Future<Output = DialOutcome> + Send + 'a;
}

// ─── AMI-backed dialer ───────────────────────────────────────────────────────

/// Places calls through the telephony manager, one session per attempt.
pub struct AmiDialer {
  config:  Arc<ManagerConfig>,
  script:  Arc<Script>,
  timeout: Duration,
}

impl AmiDialer {
  /// `timeout` bounds the whole attempt, connection and dialogue included.
  pub fn new(config: ManagerConfig, script: Script, timeout: Duration) -> Self {
    Self { config: Arc::new(config), script: Arc::new(script), timeout }
  }
}

impl Dialer for AmiDialer {
  async fn dial(&self, call: &Call, patient: &Patient, mut abort: AbortSignal) -> DialOutcome {
    let Some(number) = patient.phone.as_deref() else {
      return DialOutcome::failed(DialError::Transient("patient has no phone number".into()));
    };
    let deadline = Instant::now() + self.timeout;
    let timed_out = || DialError::Transient(format!("attempt timed out after {:?}", self.timeout));

    let connect = tokio::select! {
      r = timeout_at(deadline, Session::connect(self.config.clone())) => r,
      () = abort.aborted() => return DialOutcome::failed(DialError::Aborted),
    };
    let mut session = match connect {
      Ok(Ok(session)) => session,
      Ok(Err(e)) => return DialOutcome::failed(e.into()),
      Err(_) => return DialOutcome::failed(timed_out()),
    };

    let result = {
      let script = &self.script;
      let session = &mut session;
      let attempt = async move {
        session.login().await?;
        session.originate(number, call.call_id).await?;
        session.await_answer().await?;
        info!(call_id = %call.call_id, "call answered");
        let answered = Instant::now();
        let capture = dialogue::run(script, session, patient).await;
        Ok::<_, jade_ami::Error>((capture, answered.elapsed()))
      };
      tokio::select! {
        r = attempt => r.map_err(DialError::from),
        () = sleep_until(deadline) => Err(timed_out()),
        () = abort.aborted() => Err(DialError::Aborted),
      }
    };

    let connected_at = session.connected_at();
    // Every path ends here, so the leg and the manager login never outlive
    // the attempt.
    session.close().await;
    debug!(call_id = %call.call_id, "attempt finished");

    match result {
      Ok((capture, duration)) => DialOutcome::Answered {
        connected_at: connected_at.unwrap_or_else(Utc::now),
        duration,
        capture,
      },
      Err(error) => DialOutcome::Failed { error, connected_at },
    }
  }
}
