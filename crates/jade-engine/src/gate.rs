//! Suspension of dispatch after the telephony manager rejects our login.
//!
//! Retrying with the same credentials cannot succeed, so the first
//! authentication failure closes the gate. Workers stop claiming calls until
//! an operator resumes dispatch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jade_core::alert::Alert;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suspension {
  pub reason: String,
  pub since:  DateTime<Utc>,
}

#[derive(Clone)]
pub struct DispatchGate {
  state: Arc<watch::Sender<Option<Suspension>>>,
}

impl Default for DispatchGate {
  fn default() -> Self { Self::new() }
}

impl DispatchGate {
  pub fn new() -> Self { Self { state: Arc::new(watch::Sender::new(None)) } }

  pub fn is_open(&self) -> bool { self.state.borrow().is_none() }

  pub fn suspension(&self) -> Option<Suspension> { self.state.borrow().clone() }

  /// Close the gate. A gate that is already closed keeps its first reason.
  pub fn suspend(&self, reason: &str) {
    let closed = self.state.send_if_modified(|state| {
      if state.is_some() {
        return false;
      }
      *state = Some(Suspension { reason: reason.to_owned(), since: Utc::now() });
      true
    });
    if closed {
      warn!(%reason, "dispatch suspended: manager rejected credentials");
    }
  }

  /// Reopen the gate. Returns whether it was closed.
  pub fn resume(&self) -> bool {
    let was_closed = self.state.send_replace(None).is_some();
    if was_closed {
      info!("dispatch resumed");
    }
    was_closed
  }

  /// The operational alert for a closed gate.
  pub fn alert(&self) -> Option<Alert> {
    self
      .suspension()
      .map(|s| Alert::manager_authentication(&s.reason, s.since))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn suspend_and_resume() {
    let gate = DispatchGate::new();
    assert!(gate.is_open());
    assert!(gate.alert().is_none());

    gate.suspend("bad secret");
    gate.suspend("second reason");
    assert!(!gate.is_open());
    assert_eq!(gate.suspension().unwrap().reason, "bad secret");
    assert!(gate.alert().is_some());

    assert!(gate.resume());
    assert!(!gate.resume());
    assert!(gate.is_open());
  }
}
