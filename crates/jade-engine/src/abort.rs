//! Operator-initiated aborts of in-flight calls.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::watch;
use uuid::Uuid;

/// Calls currently being dialled, each with a switch that aborts it.
#[derive(Clone, Default)]
pub struct AbortRegistry {
  active: Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl AbortRegistry {
  pub fn new() -> Self { Self::default() }

  /// Register an attempt. The call stays abortable until the returned signal
  /// is dropped.
  pub fn register(&self, call_id: Uuid) -> AbortSignal {
    let (tx, rx) = watch::channel(false);
    self.lock().insert(call_id, tx);
    AbortSignal { call_id, rx, registry: Some(self.clone()) }
  }

  /// Abort the in-flight attempt for `call_id`. Returns `false` if no
  /// attempt is running.
  pub fn abort(&self, call_id: Uuid) -> bool {
    match self.lock().get(&call_id) {
      Some(tx) => {
        tx.send_replace(true);
        true
      }
      None => false,
    }
  }

  pub fn is_active(&self, call_id: Uuid) -> bool { self.lock().contains_key(&call_id) }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, watch::Sender<bool>>> {
    // The map holds no invariant a panicking holder could break.
    self.active.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Handed to a [`crate::Dialer`]; resolves once the operator aborts the
/// call.
pub struct AbortSignal {
  call_id:  Uuid,
  rx:       watch::Receiver<bool>,
  registry: Option<AbortRegistry>,
}

impl AbortSignal {
  /// A signal that never fires.
  pub fn never() -> Self {
    let (_, rx) = watch::channel(false);
    Self { call_id: Uuid::nil(), rx, registry: None }
  }

  pub fn is_aborted(&self) -> bool { *self.rx.borrow() }

  /// Wait for an abort. Pends forever if none comes.
  pub async fn aborted(&mut self) {
    if self.rx.wait_for(|aborted| *aborted).await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}

impl Drop for AbortSignal {
  fn drop(&mut self) {
    if let Some(registry) = &self.registry {
      registry.lock().remove(&self.call_id);
    }
  }
}
